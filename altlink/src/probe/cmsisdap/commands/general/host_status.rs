use super::super::{ensure_response, CommandId, Request, SendError, Status};

/// The two status LEDs a CMSIS-DAP probe drives on behalf of the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Led {
    Connect = 0,
    Running = 1,
}

#[derive(Clone, Copy, Debug)]
pub struct HostStatusRequest {
    led: Led,
    on: bool,
}

impl HostStatusRequest {
    pub fn new(led: Led, on: bool) -> Self {
        HostStatusRequest { led, on }
    }
}

impl Request for HostStatusRequest {
    const COMMAND_ID: CommandId = CommandId::HostStatus;

    type Response = HostStatusResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        buffer[0] = self.led as u8;
        buffer[1] = u8::from(self.on);
        Ok(2)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        ensure_response(buffer, 1)?;
        Ok(HostStatusResponse(Status::from_byte(buffer[0])?))
    }
}

#[derive(Copy, Clone, Debug)]
pub struct HostStatusResponse(pub(crate) Status);
