//! Debug interfaces of application and real-time profile cores.

mod armv7ar;
pub(crate) mod instructions;

pub use armv7ar::{Armv7arDebugInterface, Dbgdevid, Dbgdevid1, Dbgdidr, Dbgdscr, Mpidr};
