pub mod cmsisdap;
pub(crate) mod common;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cmsisdap::CmsisDap;
pub use common::{IdCode, JtagDevice, ScanChainError};

/// How the probe talks to the target's debug port.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum ConnectionType {
    /// A plain JTAG-DP.
    #[serde(rename = "JTAG")]
    #[cfg_attr(feature = "cli", value(name = "jtag"))]
    Jtag,
    /// A SWJ-DP driven in JTAG mode.
    #[serde(rename = "SWJ_JTAG")]
    #[cfg_attr(feature = "cli", value(name = "swj-jtag"))]
    SwjJtag,
    /// A SWJ-DP driven in SWD mode.
    #[default]
    #[serde(rename = "SWJ_SWD")]
    #[cfg_attr(feature = "cli", value(name = "swj-swd"))]
    SwjSwd,
}

impl ConnectionType {
    pub fn is_jtag(&self) -> bool {
        matches!(self, ConnectionType::Jtag | ConnectionType::SwjJtag)
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionType::Jtag => write!(f, "JTAG"),
            ConnectionType::SwjJtag => write!(f, "SWJ_JTAG"),
            ConnectionType::SwjSwd => write!(f, "SWJ_SWD"),
        }
    }
}

impl std::str::FromStr for ConnectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match &s.to_ascii_lowercase().replace('-', "_")[..] {
            "jtag" => Ok(ConnectionType::Jtag),
            "swj_jtag" => Ok(ConnectionType::SwjJtag),
            "swj_swd" | "swd" => Ok(ConnectionType::SwjSwd),
            _ => Err(format!(
                "'{s}' is not a valid connection type. Choose from [JTAG, SWJ_JTAG, SWJ_SWD]."
            )),
        }
    }
}

#[derive(Error, Debug)]
pub enum DebugProbeError {
    #[error("USB Communication Error")]
    Usb(#[from] hidapi::HidError),
    #[error("An error specific to the CMSIS-DAP probe occurred")]
    CmsisDap(#[from] cmsisdap::commands::CmsisDapError),
    #[error("Probe was not found")]
    NotFound,
    #[error("The connected probe does not support the interface '{0}'")]
    InterfaceNotAvailable(&'static str),
    #[error("No device found on the JTAG scan chain")]
    NoJtagDevice,
    #[error("Failed to decode the JTAG scan chain")]
    ScanChain(#[from] ScanChainError),
}

/// Identifies one attached CMSIS-DAP probe.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct DebugProbeInfo {
    /// Platform specific HID path, used to open the probe.
    pub path: String,
    pub product_string: String,
    pub serial_number: Option<String>,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl fmt::Debug for DebugProbeInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} (VID: {:04x}, PID: {:04x}, {}{})",
            self.product_string,
            self.vendor_id,
            self.product_id,
            self.serial_number
                .clone()
                .map_or("".to_owned(), |v| format!("Serial: {v}, ")),
            self.path
        )
    }
}

impl fmt::Display for DebugProbeInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} -- {:04x}:{:04x}",
            self.product_string, self.vendor_id, self.product_id
        )?;
        if let Some(serial) = &self.serial_number {
            write!(f, ":{serial}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use test_case::test_case;

    use super::*;

    #[test_case("JTAG" => ConnectionType::Jtag)]
    #[test_case("swj-jtag" => ConnectionType::SwjJtag)]
    #[test_case("SWJ_SWD" => ConnectionType::SwjSwd)]
    #[test_case("swd" => ConnectionType::SwjSwd)]
    fn connection_type_from_str(s: &str) -> ConnectionType {
        s.parse().unwrap()
    }

    #[test]
    fn connection_type_is_serialized_by_wire_name() {
        let json = serde_json::to_string(&ConnectionType::SwjJtag).unwrap();

        assert_eq!(json, "\"SWJ_JTAG\"");
    }

    #[test]
    fn probe_info_display() {
        let info = DebugProbeInfo {
            path: "/dev/hidraw3".into(),
            product_string: "DAPLink CMSIS-DAP".into(),
            serial_number: Some("0240000032044e45".into()),
            vendor_id: 0x0d28,
            product_id: 0x0204,
        };

        assert_eq!(
            info.to_string(),
            "DAPLink CMSIS-DAP -- 0d28:0204:0240000032044e45"
        );
    }
}
