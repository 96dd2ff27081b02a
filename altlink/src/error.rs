use crate::architecture::arm::{memory::romtable::RomTableError, ArmError};
use crate::probe::DebugProbeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("An error with the usage of the probe occurred")]
    Probe(#[from] DebugProbeError),
    #[error("An ARM specific error occurred")]
    Arm(#[from] ArmError),
    #[error("Failed to read a ROM table")]
    RomTable(#[from] RomTableError),
    #[error("Failed to parse supplied configuration:\n{0}")]
    Config(String),
    #[error("The device has not been opened")]
    NotOpened,
    #[error("The device has not been scanned")]
    NotScanned,
    #[error("No CMSIS-DAP device matches the selection")]
    NoDevice,
    #[error("The target has no {0}")]
    MissingUnit(&'static str),
    #[error("The requested operation is not supported")]
    NotSupported,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
