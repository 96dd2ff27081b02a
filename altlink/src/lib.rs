//! # Host side driver for CMSIS-DAP debug probes
//!
//! Talks to ARM targets through a CMSIS-DAP v1 (HID) probe over SWD or JTAG, discovers the
//! CoreSight components behind the debug port and offers run control, registers and memory
//! through a [`TargetInterface`].
//!
//! ## Halting and resuming the attached core
//!
//! ```no_run
//! # use altlink::Error;
//! use altlink::{AltLink, Config, TargetInterface};
//!
//! let mut altlink = AltLink::new(Config::default())?;
//! altlink.enumerate()?;
//!
//! let device = altlink.open(0)?;
//! device.scan()?;
//!
//! let mut ti = device.ti()?;
//! ti.attach()?;
//! let registers = ti.read_generic_registers()?;
//! println!("PC: {:#010x}", registers[15]);
//! ti.detach()?;
//! # Ok::<(), Error>(())
//! ```

/// All the interface bits for the different architectures.
pub mod architecture;
pub mod config;
mod error;
pub mod probe;
pub mod session;
pub mod target_interface;

pub use crate::architecture::arm::MemoryInterface;
pub use crate::config::{Config, Configs};
pub use crate::error::Error;
pub use crate::probe::{ConnectionType, DebugProbeError, DebugProbeInfo};
pub use crate::session::{AltLink, Device};
pub use crate::target_interface::{
    BreakpointKind, BreakpointType, RunState, Signal, TargetInterface, WatchpointType,
};
