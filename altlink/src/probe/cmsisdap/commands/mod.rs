pub mod general;
pub mod jtag;
pub mod swd;
pub mod swj;
pub mod transfer;

use std::str::Utf8Error;
use std::time::Duration;

use crate::probe::cmsisdap::commands::general::info::PacketSizeCommand;

#[derive(Debug, thiserror::Error)]
pub enum CmsisDapError {
    #[error("CMSIS-DAP command {command_id:?} failed")]
    Send {
        command_id: CommandId,
        source: SendError,
    },
    #[error("Probe answered with DAP_ERROR")]
    ErrorResponse,
    #[error("SWJ sequence is longer than 256 bits")]
    TooMuchData,
    #[error("Too many sequences or bits provided for JTAG Sequence command")]
    JtagSequenceTooMuchData,
    #[error("Too many devices provided for JTAG Configure command")]
    JtagConfigureTooMuchData,
    #[error("Probe never reported its packet size")]
    NoPacketSize,
    #[error("Probe reported an unusable packet size of {0} bytes")]
    InvalidPacketSize(u16),
    #[error("Probe could not connect in the requested mode")]
    ConnectFailed,
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("USB HID transfer failed")]
    HidApi(#[from] hidapi::HidError),
    #[error("Response is shorter than expected")]
    NotEnoughData,
    #[error("Request does not fit into a {0} byte packet")]
    PacketTooLarge(usize),
    #[error("Response status is neither DAP_OK nor DAP_ERROR")]
    InvalidResponseStatus,
    #[error("DAP_Connect answered with unknown port {0:#x}")]
    ConnectResponseError(u8),
    #[error("Command ID in response ({0:#04x}) does not match sent command ID")]
    CommandIdMismatch(u8),
    /// Info strings are UTF-8 encoded.
    #[error("Info string is not valid UTF-8")]
    InvalidString(#[from] Utf8Error),
    #[error("Response does not match the request")]
    UnexpectedAnswer,
    #[error("No response from the probe in time")]
    Timeout,
}

/// A report pipe to a CMSIS-DAP v1 probe.
///
/// Every exchange is a full report written to the device followed by a
/// blocking read of the response report.
pub trait HidTransport: Send {
    /// Write one report. `buf[0]` is the HID report id.
    fn write(&mut self, buf: &[u8]) -> Result<usize, SendError>;

    /// Read one report, waiting at most `timeout`. Returns the number of bytes read,
    /// where zero means nothing arrived in time.
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, SendError>;
}

impl HidTransport for hidapi::HidDevice {
    fn write(&mut self, buf: &[u8]) -> Result<usize, SendError> {
        Ok(hidapi::HidDevice::write(self, buf)?)
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, SendError> {
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        Ok(hidapi::HidDevice::read_timeout(self, buf, millis)?)
    }
}

/// Default HID report size used until the probe reports its own.
pub(crate) const DEFAULT_REPORT_SIZE: usize = 64;

pub struct CmsisDapDevice {
    handle: Box<dyn HidTransport>,
    report_size: usize,
    timeout: Duration,
}

impl std::fmt::Debug for CmsisDapDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CmsisDapDevice")
            .field("report_size", &self.report_size)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CmsisDapDevice {
    pub fn new(handle: Box<dyn HidTransport>, timeout: Duration) -> Self {
        Self {
            handle,
            report_size: DEFAULT_REPORT_SIZE,
            timeout,
        }
    }

    pub fn report_size(&self) -> usize {
        self.report_size
    }

    /// Read one response report into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SendError> {
        match self.handle.read_timeout(buf, self.timeout)? {
            0 => Err(SendError::Timeout),
            n => Ok(n),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, SendError> {
        self.handle.write(buf)
    }

    /// Throw away stale responses so the next read answers the next request.
    /// Errors only mean there was nothing left.
    pub(crate) fn drain(&mut self) {
        tracing::debug!("Draining probe of any pending data.");

        let mut discard = vec![0u8; self.report_size + 1];
        loop {
            match self
                .handle
                .read_timeout(&mut discard, Duration::from_millis(1))
            {
                Ok(n) if n != 0 => continue,
                _ => break,
            }
        }
    }

    pub(crate) fn set_packet_size(&mut self, packet_size: usize) {
        tracing::debug!("Configuring probe to use packet size {}", packet_size);
        self.report_size = packet_size;
    }

    /// Ask the probe for its packet size and use it from now on.
    ///
    /// Some probes only answer once a full report worth of data has arrived,
    /// so the request is repeated a few times before giving up.
    pub(crate) fn find_packet_size(&mut self) -> Result<usize, CmsisDapError> {
        for repeat in 0..16 {
            tracing::debug!("Attempt {} to find packet size", repeat + 1);
            match send_command(self, &PacketSizeCommand {}) {
                Ok(size) if size < 16 => return Err(CmsisDapError::InvalidPacketSize(size)),
                Ok(size) => {
                    tracing::debug!("Success: packet size is {}", size);
                    self.set_packet_size(size as usize);
                    return Ok(size as usize);
                }

                // Ignore timeouts and retry.
                Err(CmsisDapError::Send {
                    source: SendError::Timeout,
                    ..
                }) => (),

                Err(e) => return Err(e),
            }
        }

        Err(CmsisDapError::NoPacketSize)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    DAPOk = 0x00,
    DAPError = 0xFF,
}

impl Status {
    pub fn from_byte(value: u8) -> Result<Self, SendError> {
        match value {
            0x00 => Ok(Status::DAPOk),
            0xFF => Ok(Status::DAPError),
            _ => Err(SendError::InvalidResponseStatus),
        }
    }

    /// Turn a `DAP_ERROR` status into [`CmsisDapError::ErrorResponse`].
    pub fn into_result(self) -> Result<(), CmsisDapError> {
        match self {
            Status::DAPOk => Ok(()),
            Status::DAPError => Err(CmsisDapError::ErrorResponse),
        }
    }
}

/// First byte of every request, echoed as the first byte of its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandId {
    Info = 0x00,
    HostStatus = 0x01,
    Connect = 0x02,
    Disconnect = 0x03,
    TransferConfigure = 0x04,
    Transfer = 0x05,
    WriteAbort = 0x08,
    SwjPins = 0x10,
    SwjClock = 0x11,
    SwjSequence = 0x12,
    SwdConfigure = 0x13,
    JtagSequence = 0x14,
    JtagConfigure = 0x15,
    JtagIdcode = 0x16,
}

pub(crate) trait Request {
    const COMMAND_ID: CommandId;

    type Response;

    /// Encode the request parameters after the command id, returning their length.
    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError>;

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError>;
}

/// Fail with [`SendError::PacketTooLarge`] unless `buffer` can hold `needed` bytes.
pub(crate) fn ensure_capacity(buffer: &[u8], needed: usize) -> Result<(), SendError> {
    if buffer.len() < needed {
        Err(SendError::PacketTooLarge(needed))
    } else {
        Ok(())
    }
}

/// Fail with [`SendError::NotEnoughData`] unless the response holds `needed` bytes.
pub(crate) fn ensure_response(buffer: &[u8], needed: usize) -> Result<(), SendError> {
    if buffer.len() < needed {
        Err(SendError::NotEnoughData)
    } else {
        Ok(())
    }
}

pub(crate) fn send_command<Req: Request>(
    device: &mut CmsisDapDevice,
    request: &Req,
) -> Result<Req::Response, CmsisDapError> {
    send_command_inner(device, request).map_err(|e| CmsisDapError::Send {
        command_id: Req::COMMAND_ID,
        source: e,
    })
}

fn send_command_inner<Req: Request>(
    device: &mut CmsisDapDevice,
    request: &Req,
) -> Result<Req::Response, SendError> {
    // One extra byte for the HID report ID.
    let buffer_len = device.report_size + 1;
    let mut buffer = vec![0; buffer_len];

    // Byte 0 is the report id.
    buffer[1] = Req::COMMAND_ID as u8;
    request.to_bytes(&mut buffer[2..])?;

    // HID devices always receive a full report, zero padded.
    let _ = device.write(&buffer)?;
    trace_buffer("Transmit buffer", &buffer);

    let bytes_read = device.read(&mut buffer)?;
    let response_data = &buffer[..bytes_read];
    trace_buffer("Receive buffer", response_data);

    if response_data.is_empty() {
        return Err(SendError::NotEnoughData);
    }

    if response_data[0] == Req::COMMAND_ID as u8 {
        request.parse_response(&response_data[1..])
    } else {
        Err(SendError::CommandIdMismatch(response_data[0]))
    }
}

/// Trace a report without its zero padding.
fn trace_buffer(name: &str, buf: &[u8]) {
    if tracing::enabled!(tracing::Level::TRACE) {
        let len = buf.len();
        let cut = len + 1 - buf.iter().rev().position(|&x| x != 0).unwrap_or(len);
        let end = std::cmp::min(len, std::cmp::max(1, cut));
        tracing::trace!("{}: {:02X?}...", name, &buf[..end]);
    }
}
