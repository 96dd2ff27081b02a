/// Implementation of the DAP_JTAG_IDCODE command
use scroll::{Pread, LE};

use super::super::{ensure_response, CommandId, Request, SendError, Status};

/// Reads the IDCODE of the TAP at `index`, using the IR lengths pushed by DAP_JTAG_Configure.
#[derive(Clone, Copy, Debug)]
pub struct IdCodeRequest {
    index: u8,
}

impl IdCodeRequest {
    pub(crate) fn new(index: u8) -> IdCodeRequest {
        IdCodeRequest { index }
    }
}

impl Request for IdCodeRequest {
    const COMMAND_ID: CommandId = CommandId::JtagIdcode;

    type Response = IdCodeResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        buffer[0] = self.index;
        Ok(1)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        ensure_response(buffer, 5)?;
        let status = Status::from_byte(buffer[0])?;
        let idcode = buffer
            .pread_with(1, LE)
            .map_err(|_| SendError::NotEnoughData)?;

        Ok(IdCodeResponse { status, idcode })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct IdCodeResponse {
    pub(crate) status: Status,
    pub(crate) idcode: u32,
}
