use super::super::{ensure_capacity, ensure_response, CommandId, Request, SendError, Status};

/// `DAP_WriteABORT`: writes the DP ABORT register, also in JTAG mode.
#[derive(Debug, Clone, Copy)]
pub struct WriteAbortRequest {
    /// Zero based device index of the selected JTAG device. Ignored for SWD.
    pub dap_index: u8,
    pub abort: u32,
}

impl Request for WriteAbortRequest {
    const COMMAND_ID: CommandId = CommandId::WriteAbort;

    type Response = WriteAbortResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        ensure_capacity(buffer, 5)?;
        buffer[0] = self.dap_index;
        buffer[1..5].copy_from_slice(&self.abort.to_le_bytes());
        Ok(5)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        ensure_response(buffer, 1)?;
        Ok(WriteAbortResponse(Status::from_byte(buffer[0])?))
    }
}

#[derive(Debug)]
pub struct WriteAbortResponse(pub(crate) Status);
