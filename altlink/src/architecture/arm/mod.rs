//! All the interface bits for ARM.

#[macro_use]
mod register_generation;

pub mod ap;
pub mod communication_interface;
pub mod component;
pub mod core;
pub mod dp;
pub mod memory;
pub mod traits;

pub use communication_interface::{
    ArmCommunicationInterface, ArmCommunicationInterfaceState, ArmError, DapError, Register,
};
pub use memory::{ApMemory, MemoryInterface};
pub use traits::{ArmMemoryPorts, PortType, RawDapAccess};
