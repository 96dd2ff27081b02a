use super::{memory::MemoryInterface, ArmError};
use crate::probe::ConnectionType;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PortType {
    DebugPort,
    AccessPort,
}

/// Low-level DAP register access.
///
/// Operations on this trait closely match the transactions on the wire. Bank switching,
/// AP selection and error recovery are the responsibility of the caller.
pub trait RawDapAccess {
    /// Read a DAP register.
    ///
    /// Only bits 2 and 3 of `addr` are used.
    fn raw_read_register(&mut self, port: PortType, addr: u8) -> Result<u32, ArmError>;

    /// Write a value to a DAP register.
    ///
    /// Only bits 2 and 3 of `addr` are used.
    fn raw_write_register(&mut self, port: PortType, addr: u8, value: u32)
        -> Result<(), ArmError>;

    /// Write the DP ABORT register.
    ///
    /// On JTAG the ABORT register lives behind its own instruction, so probes route this
    /// through a dedicated path.
    fn raw_write_abort(&mut self, abort: u32) -> Result<(), ArmError> {
        self.raw_write_register(PortType::DebugPort, 0x0, abort)
    }

    /// The wire protocol currently driven, which decides how sticky errors are cleared.
    fn connection_type(&self) -> ConnectionType;
}

/// Memory behind the access ports of one debug port.
pub trait ArmMemoryPorts {
    /// Memory access through the access port `ap`.
    fn memory(&mut self, ap: u8) -> Box<dyn MemoryInterface + '_>;
}

impl<T: ArmMemoryPorts + ?Sized> ArmMemoryPorts for &mut T {
    fn memory(&mut self, ap: u8) -> Box<dyn MemoryInterface + '_> {
        (**self).memory(ap)
    }
}
