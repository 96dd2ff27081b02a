use super::super::{ensure_response, CommandId, Request, SendError, Status};

/// Sets the SWD/JTAG clock frequency in Hz.
#[derive(Debug)]
pub struct SWJClockRequest(pub(crate) u32);

impl Request for SWJClockRequest {
    const COMMAND_ID: CommandId = CommandId::SwjClock;

    type Response = SWJClockResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        buffer[0..4].copy_from_slice(&self.0.to_le_bytes());
        Ok(4)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        ensure_response(buffer, 1)?;
        Ok(SWJClockResponse(Status::from_byte(buffer[0])?))
    }
}

#[derive(Debug)]
pub(crate) struct SWJClockResponse(pub(crate) Status);
