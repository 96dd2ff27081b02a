pub mod abort;
pub mod configure;

use super::{ensure_capacity, ensure_response, CommandId, Request, SendError};
use crate::architecture::arm::PortType;
use scroll::{Pread, LE};

/// A single DP or AP register access inside a DAP_Transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transfer {
    pub port: PortType,
    /// Register address, only A[3:2] go over the wire.
    pub address: u8,
    /// The value to write, `None` for a read.
    pub value: Option<u32>,
}

impl Transfer {
    /// Bit 0 APnDP, bit 1 RnW, bits 2 and 3 the register address.
    fn request_byte(&self) -> u8 {
        let ap = u8::from(self.port == PortType::AccessPort);
        let read = u8::from(self.value.is_none());
        ap | read << 1 | (self.address & 0x0C)
    }

    fn is_read(&self) -> bool {
        self.value.is_none()
    }
}

/// DAP_Transfer: read or write DP and AP registers.
///
/// The probe stops at the first transfer answered with WAIT (after its configured retries),
/// FAULT or a protocol error, so the response may cover fewer transfers than requested.
#[derive(Debug)]
pub struct TransferRequest {
    /// Index of the selected device on the JTAG chain, ignored over SWD.
    pub dap_index: u8,
    transfers: Vec<Transfer>,
}

impl TransferRequest {
    pub fn new(dap_index: u8, transfers: Vec<Transfer>) -> Self {
        Self {
            dap_index,
            transfers,
        }
    }

    pub fn read(dap_index: u8, port: PortType, address: u8) -> Self {
        Self::new(
            dap_index,
            vec![Transfer {
                port,
                address,
                value: None,
            }],
        )
    }

    pub fn write(dap_index: u8, port: PortType, address: u8, value: u32) -> Self {
        Self::new(
            dap_index,
            vec![Transfer {
                port,
                address,
                value: Some(value),
            }],
        )
    }
}

impl Request for TransferRequest {
    const COMMAND_ID: CommandId = CommandId::Transfer;

    type Response = TransferResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        let needed = 2 + self
            .transfers
            .iter()
            .map(|transfer| if transfer.is_read() { 1 } else { 5 })
            .sum::<usize>();
        ensure_capacity(buffer, needed)?;

        buffer[0] = self.dap_index;
        buffer[1] = self.transfers.len() as u8;
        let mut offset = 2;
        for transfer in &self.transfers {
            buffer[offset] = transfer.request_byte();
            offset += 1;
            if let Some(value) = transfer.value {
                buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
                offset += 4;
            }
        }
        Ok(offset)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        ensure_response(buffer, 2)?;
        let executed = buffer[0] as usize;
        if executed > self.transfers.len() {
            tracing::error!(
                "Probe reports {} transfers, {} were requested",
                executed,
                self.transfers.len()
            );
            return Err(SendError::UnexpectedAnswer);
        }

        let ack = Ack::from_bits(buffer[1]);
        let protocol_error = buffer[1] & 0x08 != 0;

        // Read data is only returned for transfers that completed. All but the last
        // executed transfer did, the last one only if it was acknowledged.
        let completed = match ack {
            Ack::Ok => executed,
            _ => executed.saturating_sub(1),
        };
        let reads = self.transfers[..completed]
            .iter()
            .filter(|transfer| transfer.is_read())
            .count();
        let values = (0..reads)
            .map(|i| {
                buffer
                    .pread_with::<u32>(2 + 4 * i, LE)
                    .map_err(|_| SendError::NotEnoughData)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TransferResponse {
            executed,
            ack,
            protocol_error,
            values,
        })
    }
}

/// Acknowledge of the last executed transfer, bits 2:0 of the transfer response.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Ack {
    /// OK over SWD, OK or FAULT over JTAG.
    Ok = 1,
    Wait = 2,
    Fault = 4,
    /// No acknowledge from the target.
    None = 7,
}

impl Ack {
    fn from_bits(value: u8) -> Self {
        match value & 0x7 {
            1 => Ack::Ok,
            2 => Ack::Wait,
            4 => Ack::Fault,
            _ => Ack::None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct TransferResponse {
    /// Number of transfers the probe executed, including a failed last one.
    pub executed: usize,
    pub ack: Ack,
    /// SWD parity or protocol error on the last transfer.
    pub protocol_error: bool,
    /// Values of the completed reads, in request order.
    pub values: Vec<u32>,
}

#[cfg(test)]
mod test {
    use test_case::test_case;

    use super::*;

    #[test_case(PortType::DebugPort, 0x0, None => 0x02; "dp idcode read")]
    #[test_case(PortType::DebugPort, 0x8, Some(0) => 0x08; "dp select write")]
    #[test_case(PortType::AccessPort, 0xC, None => 0x0F; "ap drw read")]
    #[test_case(PortType::AccessPort, 0x4, Some(0) => 0x05; "ap tar write")]
    fn request_byte(port: PortType, address: u8, value: Option<u32>) -> u8 {
        Transfer {
            port,
            address,
            value,
        }
        .request_byte()
    }

    #[test]
    fn write_request_layout() {
        let request = TransferRequest::write(0, PortType::DebugPort, 0x8, 0x0100_00F0);
        let mut buffer = [0u8; 16];

        let len = request.to_bytes(&mut buffer).unwrap();

        assert_eq!(
            &buffer[..len],
            &[0x00, 0x01, 0x08, 0xF0, 0x00, 0x00, 0x01]
        );
    }

    #[test]
    fn batched_request_layout() {
        let request = TransferRequest::new(
            1,
            vec![
                Transfer {
                    port: PortType::AccessPort,
                    address: 0x4,
                    value: Some(0x2000_0000),
                },
                Transfer {
                    port: PortType::AccessPort,
                    address: 0xC,
                    value: None,
                },
            ],
        );
        let mut buffer = [0u8; 16];

        let len = request.to_bytes(&mut buffer).unwrap();

        assert_eq!(
            &buffer[..len],
            &[0x01, 0x02, 0x05, 0x00, 0x00, 0x00, 0x20, 0x0F]
        );
    }

    #[test]
    fn request_must_fit_the_report() {
        let request = TransferRequest::write(0, PortType::DebugPort, 0x8, 0);
        let mut buffer = [0u8; 4];

        assert!(matches!(
            request.to_bytes(&mut buffer),
            Err(SendError::PacketTooLarge(7))
        ));
    }

    #[test]
    fn read_response_carries_data() {
        let request = TransferRequest::read(0, PortType::DebugPort, 0x0);

        let response = request
            .parse_response(&[0x01, 0x01, 0x77, 0x14, 0xB1, 0x2B])
            .unwrap();

        assert_eq!(
            response,
            TransferResponse {
                executed: 1,
                ack: Ack::Ok,
                protocol_error: false,
                values: vec![0x2BB1_1477],
            }
        );
    }

    #[test]
    fn only_reads_carry_data() {
        let request = TransferRequest::new(
            0,
            vec![
                Transfer {
                    port: PortType::AccessPort,
                    address: 0xC,
                    value: None,
                },
                Transfer {
                    port: PortType::AccessPort,
                    address: 0x4,
                    value: Some(0x2000_0000),
                },
                Transfer {
                    port: PortType::AccessPort,
                    address: 0xC,
                    value: None,
                },
            ],
        );

        let response = request
            .parse_response(&[0x03, 0x01, 0x11, 0x00, 0x00, 0x00, 0x22, 0x00, 0x00, 0x00])
            .unwrap();
        assert_eq!(response.values, vec![0x11, 0x22]);

        assert!(matches!(
            request.parse_response(&[0x03, 0x01, 0x11, 0x00, 0x00, 0x00]),
            Err(SendError::NotEnoughData)
        ));
    }

    #[test_case(0x02 => Ack::Wait)]
    #[test_case(0x04 => Ack::Fault)]
    #[test_case(0x07 => Ack::None)]
    fn failed_read_has_no_data(ack: u8) -> Ack {
        let request = TransferRequest::read(0, PortType::AccessPort, 0xC);

        let response = request.parse_response(&[0x01, ack]).unwrap();

        assert!(response.values.is_empty());
        response.ack
    }

    #[test]
    fn protocol_error_flag() {
        let request = TransferRequest::read(0, PortType::AccessPort, 0xC);

        let response = request.parse_response(&[0x00, 0x09]).unwrap();

        assert!(response.protocol_error);
        assert_eq!(response.executed, 0);
    }

    #[test]
    fn more_transfers_than_requested_is_rejected() {
        let request = TransferRequest::read(0, PortType::AccessPort, 0xC);

        assert!(matches!(
            request.parse_response(&[0x02, 0x01, 0, 0, 0, 0, 0, 0, 0, 0]),
            Err(SendError::UnexpectedAnswer)
        ));
    }
}
