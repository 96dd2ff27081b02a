use super::super::{ensure_response, CommandId, Request, SendError};
use serde::{Deserialize, Serialize};

bitfield::bitfield! {
    /// Pin levels as used by `DAP_SWJ_Pins`.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Pins(u8);
    impl Debug;
    pub nreset, set_nreset: 7;
    pub ntrst, set_ntrst: 5;
    pub tdo, set_tdo: 3;
    pub tdi, set_tdi: 2;
    pub swdio_tms, set_swdio_tms: 1;
    pub swclk_tck, set_swclk_tck: 0;
}

/// Decoded pin levels, as reported back by the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinStatus {
    pub swclk_tck: bool,
    pub swdio_tms: bool,
    pub tdi: bool,
    pub tdo: bool,
    pub ntrst: bool,
    pub nreset: bool,
}

impl From<Pins> for PinStatus {
    fn from(pins: Pins) -> Self {
        PinStatus {
            swclk_tck: pins.swclk_tck(),
            swdio_tms: pins.swdio_tms(),
            tdi: pins.tdi(),
            tdo: pins.tdo(),
            ntrst: pins.ntrst(),
            nreset: pins.nreset(),
        }
    }
}

impl std::fmt::Display for PinStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SWCLK:{} SWDIO:{} TDI:{} TDO:{} !TRST:{} !RESET:{}",
            u8::from(self.swclk_tck),
            u8::from(self.swdio_tms),
            u8::from(self.tdi),
            u8::from(self.tdo),
            u8::from(self.ntrst),
            u8::from(self.nreset)
        )
    }
}

pub struct SWJPinsRequest {
    /// A mask of the values the different pins selected in the selection mask will be set to.
    pub(crate) output: Pins,
    /// A mask to select all the pins that should be toggled.
    pub(crate) select: Pins,
    /// A timeout in microseconds to wait for until the pin state is read back.
    pub(crate) wait: u32,
}

impl SWJPinsRequest {
    /// Drive the pins selected by `select` to `output`, then read all pins back after `wait` µs.
    pub fn new(output: Pins, select: Pins, wait: u32) -> Self {
        Self {
            output,
            select,
            wait,
        }
    }
}

impl Request for SWJPinsRequest {
    const COMMAND_ID: CommandId = CommandId::SwjPins;

    type Response = SWJPinsResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        use scroll::{Pwrite, LE};

        buffer[0] = self.output.0;
        buffer[1] = self.select.0;
        buffer
            .pwrite_with(self.wait, 2, LE)
            .map_err(|_| SendError::PacketTooLarge(6))?;
        Ok(6)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        ensure_response(buffer, 1)?;
        Ok(Pins(buffer[0]))
    }
}

pub type SWJPinsResponse = Pins;

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn pin_request_layout() {
        let mut select = Pins(0);
        select.set_swclk_tck(true);
        let request = SWJPinsRequest::new(Pins(0), select, 0x0102_0304);
        let mut buffer = [0u8; 8];

        let len = request.to_bytes(&mut buffer).unwrap();

        assert_eq!(&buffer[..len], &[0x00, 0x01, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn pin_status_decoding() {
        let status = PinStatus::from(Pins(0b1010_0011));

        assert!(status.swclk_tck);
        assert!(status.swdio_tms);
        assert!(!status.tdi);
        assert!(status.ntrst);
        assert!(status.nreset);
        assert_eq!(status.to_string(), "SWCLK:1 SWDIO:1 TDI:0 TDO:0 !TRST:1 !RESET:1");
    }
}
