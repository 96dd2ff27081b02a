/// Implementation of the DAP_JTAG_Configure command
use super::super::{ensure_capacity, ensure_response, CmsisDapError, CommandId, Request, SendError, Status};

/// Tells the probe the IR length of every TAP on the chain, TDI side last.
#[derive(Clone, Debug)]
pub struct ConfigureRequest {
    ir_lengths: Vec<u8>,
}

impl ConfigureRequest {
    pub(crate) fn new(ir_lengths: Vec<u8>) -> Result<ConfigureRequest, CmsisDapError> {
        if ir_lengths.len() > usize::from(u8::MAX) {
            return Err(CmsisDapError::JtagConfigureTooMuchData);
        }
        Ok(ConfigureRequest { ir_lengths })
    }
}

impl Request for ConfigureRequest {
    const COMMAND_ID: CommandId = CommandId::JtagConfigure;

    type Response = ConfigureResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        ensure_capacity(buffer, self.ir_lengths.len() + 1)?;
        buffer[0] = self.ir_lengths.len() as u8;
        buffer[1..self.ir_lengths.len() + 1].copy_from_slice(&self.ir_lengths);
        Ok(self.ir_lengths.len() + 1)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        ensure_response(buffer, 1)?;
        Ok(ConfigureResponse(Status::from_byte(buffer[0])?))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ConfigureResponse(pub(crate) Status);
