use super::super::{ensure_response, CommandId, Request, SendError, Status};

/// `DAP_SWD_Configure`: turnaround period and data phase settings.
///
/// Bits [1:0] hold the turnaround period minus one, bit 2 forces a data phase
/// on WAIT and FAULT acknowledges.
#[derive(Clone, Copy, Debug)]
pub struct SwdConfigureRequest(pub(crate) u8);

impl Request for SwdConfigureRequest {
    const COMMAND_ID: CommandId = CommandId::SwdConfigure;

    type Response = SwdConfigureResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        buffer[0] = self.0;
        Ok(1)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        ensure_response(buffer, 1)?;
        Ok(SwdConfigureResponse(Status::from_byte(buffer[0])?))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SwdConfigureResponse(pub(crate) Status);
