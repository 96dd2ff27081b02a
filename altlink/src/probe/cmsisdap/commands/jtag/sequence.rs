/// Implementation of the DAP_JTAG_Sequence command
use bitvec::prelude::*;

use super::super::{ensure_capacity, ensure_response, CmsisDapError, CommandId, Request, SendError, Status};

/// One run of TCK cycles sharing a TMS level and capture setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sequence {
    /// Number of TCK cycles: 1..=64.
    tck_cycles: u8,
    tdo_capture: bool,
    tms: bool,
    /// TDI levels, LSB of the first byte first.
    data: [u8; 8],
}

impl Sequence {
    pub(crate) fn new(
        tck_cycles: u8,
        tdo_capture: bool,
        tms: bool,
        data: [u8; 8],
    ) -> Result<Self, CmsisDapError> {
        if !(1..=64).contains(&tck_cycles) {
            return Err(CmsisDapError::JtagSequenceTooMuchData);
        }
        Ok(Self {
            tck_cycles,
            tdo_capture,
            tms,
            data,
        })
    }

    pub(crate) fn tck_cycles(&self) -> u8 {
        self.tck_cycles
    }

    pub(crate) fn tdo_capture(&self) -> bool {
        self.tdo_capture
    }

    /// Sequence Info byte: cycles in [5:0] (64 encoded as 0), TMS in bit 6, TDO capture in bit 7.
    fn info(&self) -> u8 {
        (self.tck_cycles & 0x3F) | u8::from(self.tms) << 6 | u8::from(self.tdo_capture) << 7
    }

    pub(crate) fn data_len(&self) -> usize {
        usize::from(self.tck_cycles).div_ceil(8)
    }

    /// Bytes this sequence occupies in the request.
    pub(crate) fn request_len(&self) -> usize {
        1 + self.data_len()
    }

    /// Bytes this sequence occupies in the response.
    pub(crate) fn response_len(&self) -> usize {
        if self.tdo_capture {
            self.data_len()
        } else {
            0
        }
    }
}

#[derive(Clone, Debug)]
pub struct SequenceRequest {
    sequences: Vec<Sequence>,
}

impl SequenceRequest {
    pub(crate) fn new(sequences: Vec<Sequence>) -> Result<Self, CmsisDapError> {
        if sequences.is_empty() || sequences.len() > usize::from(u8::MAX) {
            return Err(CmsisDapError::JtagSequenceTooMuchData);
        }
        Ok(SequenceRequest { sequences })
    }
}

impl Request for SequenceRequest {
    const COMMAND_ID: CommandId = CommandId::JtagSequence;

    type Response = SequenceResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        let total = 1 + self.sequences.iter().map(Sequence::request_len).sum::<usize>();
        ensure_capacity(buffer, total)?;

        buffer[0] = self.sequences.len() as u8;
        let mut offset = 1;
        for sequence in &self.sequences {
            buffer[offset] = sequence.info();
            offset += 1;
            let len = sequence.data_len();
            buffer[offset..offset + len].copy_from_slice(&sequence.data[..len]);
            offset += len;
        }

        Ok(offset)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        let expected = 1 + self.sequences.iter().map(Sequence::response_len).sum::<usize>();
        ensure_response(buffer, expected)?;

        let status = Status::from_byte(buffer[0])?;

        let mut tdo = BitVec::new();
        let mut offset = 1;
        for sequence in self.sequences.iter().filter(|s| s.tdo_capture) {
            let len = sequence.data_len();
            let bits = buffer[offset..offset + len].view_bits::<Lsb0>();
            tdo.extend_from_bitslice(&bits[..usize::from(sequence.tck_cycles)]);
            offset += len;
        }

        Ok(SequenceResponse { status, tdo })
    }
}

#[derive(Debug)]
pub struct SequenceResponse {
    pub(crate) status: Status,
    /// Captured TDO levels of every capturing sequence, in order.
    pub(crate) tdo: BitVec<u8, Lsb0>,
}
