use scroll::{Pwrite, LE};

use super::super::{ensure_capacity, ensure_response, CommandId, Request, SendError, Status};

/// `DAP_TransferConfigure`: timing and retry behavior of every following `DAP_Transfer`.
#[derive(Debug, Clone, Copy)]
pub struct ConfigureRequest {
    /// Idle cycles after each transfer.
    pub idle_cycles: u8,
    /// How often a WAIT acknowledge is retried before the transfer fails.
    pub wait_retry: u16,
    /// How often a value match read is repeated.
    pub match_retry: u16,
}

impl Request for ConfigureRequest {
    const COMMAND_ID: CommandId = CommandId::TransferConfigure;

    type Response = ConfigureResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        ensure_capacity(buffer, 5)?;
        buffer[0] = self.idle_cycles;
        let mut offset = 1;
        for retries in [self.wait_retry, self.match_retry] {
            buffer
                .gwrite_with(retries, &mut offset, LE)
                .map_err(|_| SendError::PacketTooLarge(5))?;
        }
        Ok(offset)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        ensure_response(buffer, 1)?;
        Ok(ConfigureResponse(Status::from_byte(buffer[0])?))
    }
}

#[derive(Debug)]
pub struct ConfigureResponse(pub(crate) Status);

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn retries_are_little_endian() {
        let request = ConfigureRequest {
            idle_cycles: 2,
            wait_retry: 0x0140,
            match_retry: 3,
        };
        let mut buffer = [0u8; 8];

        let len = request.to_bytes(&mut buffer).unwrap();

        assert_eq!(&buffer[..len], &[0x02, 0x40, 0x01, 0x03, 0x00]);
    }
}
