use super::super::{ensure_response, CommandId, Request, SendError};

use scroll::{Pread, LE};
use serde::{Deserialize, Serialize};

macro_rules! info_command {
    ($id:expr, $name:ident, $response_type:ty) => {
        #[derive(Clone, Default, Debug)]
        pub struct $name {}

        impl Request for $name {
            const COMMAND_ID: CommandId = CommandId::Info;

            type Response = $response_type;

            fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
                buffer[0] = $id;
                Ok(1)
            }

            fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
                ParseFromResponse::from_response(buffer)
            }
        }
    };
}

info_command!(0x01, VendorCommand, Option<String>);

info_command!(0x02, ProductIdCommand, Option<String>);

info_command!(0x03, SerialNumberCommand, Option<String>);

info_command!(0x04, FirmwareVersionCommand, Option<String>);

info_command!(0x05, TargetDeviceVendorCommand, Option<String>);

info_command!(0x06, TargetDeviceNameCommand, Option<String>);

info_command!(0xF0, CapabilitiesCommand, Capabilities);

info_command!(0xFE, PacketCountCommand, u8);

info_command!(0xFF, PacketSizeCommand, u16);

trait ParseFromResponse: Sized {
    fn from_response(buffer: &[u8]) -> Result<Self, SendError>;
}

impl ParseFromResponse for Option<String> {
    /// Create a String out of the received buffer.
    ///
    /// The length of the buffer is read from the first byte of the buffer.
    /// If the length is zero, no string is returned.
    fn from_response(buffer: &[u8]) -> Result<Self, SendError> {
        ensure_response(buffer, 1)?;
        let string_len = buffer[0] as usize; // including the zero terminator

        match string_len {
            0 => Ok(None),
            n => {
                ensure_response(buffer, 1 + n)?;
                let raw = &buffer[1..1 + n];
                let raw = match raw.iter().position(|&b| b == 0) {
                    Some(end) => &raw[..end],
                    None => raw,
                };
                let res = std::str::from_utf8(raw)?;
                Ok(Some(res.to_owned()))
            }
        }
    }
}

impl ParseFromResponse for u8 {
    fn from_response(buffer: &[u8]) -> Result<Self, SendError> {
        ensure_response(buffer, 2)?;
        if buffer[0] != 1 {
            Err(SendError::UnexpectedAnswer)
        } else {
            Ok(buffer[1])
        }
    }
}

impl ParseFromResponse for u16 {
    fn from_response(buffer: &[u8]) -> Result<Self, SendError> {
        if buffer.first() != Some(&2) {
            return Err(SendError::UnexpectedAnswer);
        }
        buffer
            .pread_with(1, LE)
            .map_err(|_| SendError::NotEnoughData)
    }
}

/// Features advertised by the probe firmware in the capabilities info byte.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub swd_implemented: bool,
    pub jtag_implemented: bool,
    pub swo_uart_implemented: bool,
    pub swo_manchester_implemented: bool,
}

impl Capabilities {
    pub fn raw(&self) -> u8 {
        u8::from(self.swd_implemented)
            | u8::from(self.jtag_implemented) << 1
            | u8::from(self.swo_uart_implemented) << 2
            | u8::from(self.swo_manchester_implemented) << 3
    }
}

impl ParseFromResponse for Capabilities {
    fn from_response(buffer: &[u8]) -> Result<Self, SendError> {
        // Only the first info byte is relevant for this driver.
        if buffer.first() != Some(&1) && buffer.first() != Some(&2) {
            return Err(SendError::UnexpectedAnswer);
        }
        ensure_response(buffer, 2)?;

        Ok(Capabilities {
            swd_implemented: buffer[1] & 0x01 > 0,
            jtag_implemented: buffer[1] & 0x02 > 0,
            swo_uart_implemented: buffer[1] & 0x04 > 0,
            swo_manchester_implemented: buffer[1] & 0x08 > 0,
        })
    }
}
