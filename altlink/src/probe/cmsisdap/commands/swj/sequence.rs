/// Implementation of the DAP_SWJ_SEQUENCE command
///
use super::super::{ensure_response, CmsisDapError, CommandId, Request, SendError, Status};

#[derive(Clone, Copy, Debug)]
pub struct SequenceRequest {
    bit_count: u8,
    data: [u8; 32],
}

impl Request for SequenceRequest {
    const COMMAND_ID: CommandId = CommandId::SwjSequence;

    type Response = SequenceResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        buffer[0] = self.bit_count;

        // A bit_count of zero means that we want to transmit 256 bits
        let transfer_len_bytes = self.byte_len();

        super::super::ensure_capacity(buffer, 1 + transfer_len_bytes)?;
        buffer[1..(1 + transfer_len_bytes)].copy_from_slice(&self.data[..transfer_len_bytes]);

        // bit_count + data
        Ok(1 + transfer_len_bytes)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        ensure_response(buffer, 1)?;
        Ok(SequenceResponse(Status::from_byte(buffer[0])?))
    }
}

impl SequenceRequest {
    /// A sequence clocking out every bit of `data`, LSB of the first byte first.
    pub(crate) fn new(data: &[u8]) -> Result<SequenceRequest, CmsisDapError> {
        if data.len() > 32 {
            return Err(CmsisDapError::TooMuchData);
        }

        let bit_count = match data.len() {
            32 => 0,
            x => x * 8,
        } as u8;

        Self::with_bit_count(bit_count, data)
    }

    /// A sequence of `bit_count` bits taken from `data`. A count of zero sends 256 bits.
    pub(crate) fn with_bit_count(
        bit_count: u8,
        data: &[u8],
    ) -> Result<SequenceRequest, CmsisDapError> {
        if data.len() > 32 {
            return Err(CmsisDapError::TooMuchData);
        }

        let mut owned_data = [0u8; 32];
        owned_data[..data.len()].copy_from_slice(data);

        let request = SequenceRequest {
            bit_count,
            data: owned_data,
        };

        if request.byte_len() > data.len() {
            return Err(CmsisDapError::TooMuchData);
        }

        Ok(request)
    }

    fn byte_len(&self) -> usize {
        if self.bit_count == 0 {
            32
        } else {
            usize::from(self.bit_count).div_ceil(8)
        }
    }
}

#[derive(Debug)]
pub struct SequenceResponse(pub(crate) Status);
