//! CMSIS-DAP v1 probe implementation.
pub mod commands;
pub mod tools;

use bitvec::prelude::*;
use serde::Serialize;

use crate::{
    architecture::arm::{
        dp::Abort,
        ArmError, DapError, PortType, RawDapAccess, Register,
    },
    config::{self, Config, MAX_CLOCK_HZ},
    probe::{
        common::{extract_idcodes, extract_ir_lengths},
        ConnectionType, DebugProbeError, JtagDevice,
    },
};

use commands::{
    general::{
        connect::{ConnectRequest, ConnectResponse},
        disconnect::DisconnectRequest,
        host_status::{HostStatusRequest, Led},
        info::{
            Capabilities, CapabilitiesCommand, FirmwareVersionCommand, PacketCountCommand,
            TargetDeviceNameCommand, VendorCommand,
        },
    },
    jtag::{configure::ConfigureRequest as JtagConfigureRequest, idcode::IdCodeRequest, JtagBits},
    send_command,
    swd::configure::SwdConfigureRequest,
    swj::{
        clock::SWJClockRequest,
        pins::{PinStatus, Pins, SWJPinsRequest},
        sequence::SequenceRequest,
    },
    transfer::{
        abort::WriteAbortRequest, configure::ConfigureRequest, Ack, TransferRequest,
        TransferResponse,
    },
    CmsisDapDevice, CmsisDapError,
};

/// Longest register chain the JTAG scan will try to measure, in bits.
const MAX_SCAN_CHAIN_BITS: usize = 320;

/// SWJ switch codes, LSB first.
const JTAG_TO_SWD: [u8; 2] = [0x9E, 0xE7];
const SWD_TO_JTAG: [u8; 2] = [0x3C, 0xE7];

/// Identification of the probe firmware, as reported at initialization.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DapInfo {
    pub firmware_version: Option<String>,
    pub name: Option<String>,
    pub vendor: Option<String>,
    pub packet_max_size: u16,
    pub packet_max_count: u8,
    pub capabilities: Capabilities,
}

impl std::fmt::Display for DapInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "F/W Version : {}",
            self.firmware_version.as_deref().unwrap_or("none")
        )?;
        writeln!(f, "Packet Size : {}", self.packet_max_size)?;
        writeln!(f, "Packet Cnt  : {}", self.packet_max_count)?;
        writeln!(f, "Caps        : {:#04x}", self.capabilities.raw())?;
        writeln!(f, "Vendor Name : {}", self.vendor.as_deref().unwrap_or("none"))?;
        write!(f, "Name        : {}", self.name.as_deref().unwrap_or("none"))
    }
}

/// A CMSIS-DAP probe.
pub struct CmsisDap {
    device: CmsisDapDevice,
    info: DapInfo,
    connection_type: ConnectionType,

    /// SWJ clock in Hz
    clock_hz: u32,
    transfer: config::Transfer,

    /// Index of the debug port on the JTAG chain. Ignored for SWD.
    dap_index: u8,
    jtag_devices: Vec<JtagDevice>,
}

impl std::fmt::Debug for CmsisDap {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("CmsisDap")
            .field("info", &self.info)
            .field("connection_type", &self.connection_type)
            .field("clock_hz", &self.clock_hz)
            .field("dap_index", &self.dap_index)
            .finish()
    }
}

impl CmsisDap {
    /// Wrap an opened device. Nothing is sent until [`CmsisDap::initialize`].
    pub fn new(device: CmsisDapDevice, config: &Config) -> Self {
        Self {
            device,
            info: DapInfo::default(),
            connection_type: ConnectionType::SwjSwd,
            clock_hz: config.connection.clock_hz(),
            transfer: config.transfer,
            dap_index: 0,
            jtag_devices: Vec::new(),
        }
    }

    /// Bring the probe up and leave the target's SWJ-DP in SWD mode.
    #[tracing::instrument(skip(self))]
    pub fn initialize(&mut self) -> Result<(), DebugProbeError> {
        // Discard anything left in buffer, as otherwise
        // we'll get out of sync between requests and responses.
        self.device.drain();
        let packet_size = self.device.find_packet_size()?;
        self.device.drain();
        self.info.packet_max_size = packet_size as u16;

        self.info.capabilities = send_command(&mut self.device, &CapabilitiesCommand {})?;
        tracing::debug!("Detected probe capabilities: {:?}", self.info.capabilities);

        self.host_status(Led::Running, false)?;
        self.host_status(Led::Connect, false)?;
        self.host_status(Led::Connect, true)?;

        self.connect(ConnectRequest::UseSWD)?;

        self.info.firmware_version = send_command(&mut self.device, &FirmwareVersionCommand {})?;
        self.info.vendor = send_command(&mut self.device, &VendorCommand {})?;
        self.info.name = send_command(&mut self.device, &TargetDeviceNameCommand {})?;
        self.info.packet_max_count = send_command(&mut self.device, &PacketCountCommand {})?;

        let pins = self.pin_status()?;
        tracing::debug!("Pins: {}", pins);

        self.set_speed(self.clock_hz)?;
        send_command(
            &mut self.device,
            &ConfigureRequest {
                idle_cycles: self.transfer.idle_cycles,
                wait_retry: self.transfer.wait_retry,
                match_retry: self.transfer.match_retry,
            },
        )?
        .0
        .into_result()?;
        send_command(
            &mut self.device,
            &SwdConfigureRequest(self.transfer.swd_configure),
        )?
        .0
        .into_result()?;

        self.host_status(Led::Running, true)?;

        self.jtag_to_swd()?;
        self.connection_type = ConnectionType::SwjSwd;

        tracing::info!("CMSIS-DAP initialized\n{}", self.info);
        Ok(())
    }

    /// Disconnect from the target and turn the LEDs off.
    pub fn finalize(&mut self) -> Result<(), DebugProbeError> {
        send_command(&mut self.device, &DisconnectRequest)?
            .0
            .into_result()?;
        self.host_status(Led::Running, false)?;
        self.host_status(Led::Connect, false)?;
        Ok(())
    }

    pub fn info(&self) -> &DapInfo {
        &self.info
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    pub fn dap_index(&self) -> u8 {
        self.dap_index
    }

    /// TAPs found by the last [`CmsisDap::scan_jtag_devices`], nearest to TDO first.
    pub fn jtag_devices(&self) -> &[JtagDevice] {
        &self.jtag_devices
    }

    pub fn clock_hz(&self) -> u32 {
        self.clock_hz
    }

    /// Set the SWJ clock. Requests above [`MAX_CLOCK_HZ`] are clamped.
    ///
    /// Returns the clock actually requested from the probe.
    pub fn set_speed(&mut self, clock_hz: u32) -> Result<u32, DebugProbeError> {
        let clock_hz = clock_hz.min(MAX_CLOCK_HZ);
        send_command(&mut self.device, &SWJClockRequest(clock_hz))?
            .0
            .into_result()?;
        self.clock_hz = clock_hz;
        tracing::debug!("SWJ clock set to {} Hz", clock_hz);
        Ok(clock_hz)
    }

    /// Read back the levels of all debug pins.
    pub fn pin_status(&mut self) -> Result<PinStatus, DebugProbeError> {
        let mut select = Pins::default();
        select.set_swclk_tck(true);
        let request = SWJPinsRequest::new(Pins::default(), select, 0);
        let pins = send_command(&mut self.device, &request)?;
        Ok(PinStatus::from(pins))
    }

    /// Clear all sticky error flags of the debug port through DAP_WriteABORT.
    pub fn reset_link(&mut self) -> Result<(), DebugProbeError> {
        let request = WriteAbortRequest {
            dap_index: self.dap_index,
            abort: Abort::clear_sticky().into(),
        };
        send_command(&mut self.device, &request)?.0.into_result()?;
        Ok(())
    }

    /// Reconnect in the given mode, running the SWJ-DP switch sequence where one is needed.
    #[tracing::instrument(skip(self))]
    pub fn set_connection_type(
        &mut self,
        connection_type: ConnectionType,
    ) -> Result<(), DebugProbeError> {
        match connection_type {
            ConnectionType::Jtag | ConnectionType::SwjJtag => {
                if !self.info.capabilities.jtag_implemented {
                    return Err(DebugProbeError::InterfaceNotAvailable("JTAG"));
                }
                self.connect(ConnectRequest::UseJTAG)?;
                if connection_type == ConnectionType::SwjJtag {
                    self.swd_to_jtag()?;
                }
            }
            ConnectionType::SwjSwd => {
                if !self.info.capabilities.swd_implemented {
                    return Err(DebugProbeError::InterfaceNotAvailable("SWD"));
                }
                self.connect(ConnectRequest::UseSWD)?;
                self.jtag_to_swd()?;
                self.dap_index = 0;
                self.jtag_devices.clear();
            }
        }

        self.connection_type = connection_type;
        tracing::info!("Connection type is now {}", connection_type);
        Ok(())
    }

    /// Discover the TAPs on the JTAG chain, push their IR lengths to the probe and select
    /// the first ARM debug port as DAP.
    #[tracing::instrument(skip(self))]
    pub fn scan_jtag_devices(&mut self) -> Result<&[JtagDevice], DebugProbeError> {
        // Measure the IR chain, leaving every TAP in BYPASS.
        let mut bits = JtagBits::new();
        bits.reset()
            .enter_shift_ir()
            .fill(false, MAX_SCAN_CHAIN_BITS, true)
            .fill(true, MAX_SCAN_CHAIN_BITS, true)
            .tms(&[true, true, false]);
        let captured = self.jtag_io(&bits)?;
        let ir_len = chain_length(&captured).ok_or(DebugProbeError::NoJtagDevice)?;
        let ir = captured[..ir_len].to_bitvec();
        tracing::debug!("IR chain is {} bits long", ir_len);

        // With all TAPs in BYPASS, every device contributes a single DR bit.
        let mut bits = JtagBits::new();
        bits.enter_shift_dr()
            .fill(false, MAX_SCAN_CHAIN_BITS, true)
            .fill(true, MAX_SCAN_CHAIN_BITS, true)
            .tms(&[true, true, false]);
        let captured = self.jtag_io(&bits)?;
        let n_taps = chain_length(&captured).ok_or(DebugProbeError::NoJtagDevice)?;
        tracing::info!("Found {} TAPs on the JTAG chain", n_taps);

        // A reset selects IDCODE (or BYPASS) again.
        let mut bits = JtagBits::new();
        bits.reset()
            .enter_shift_dr()
            .fill(true, 32 * n_taps, true)
            .tms(&[true, true, false])
            .reset();
        let dr = self.jtag_io(&bits)?;

        let idcodes = extract_idcodes(&dr, n_taps)?;
        let ir_lengths = extract_ir_lengths(&ir, &idcodes)?;

        self.jtag_devices = idcodes
            .into_iter()
            .zip(ir_lengths)
            .map(|(idcode, ir_len)| JtagDevice { idcode, ir_len })
            .collect();

        let dap_index = self
            .jtag_devices
            .iter()
            .position(JtagDevice::is_arm_debug_port)
            .ok_or(DebugProbeError::NoJtagDevice)?;

        let lengths = self
            .jtag_devices
            .iter()
            .map(|device| device.ir_len as u8)
            .collect::<Vec<u8>>();
        tracing::info!("Configuring JTAG with ir lengths: {:?}", lengths);
        send_command(&mut self.device, &JtagConfigureRequest::new(lengths)?)?
            .0
            .into_result()?;

        self.dap_index = dap_index as u8;
        let response = send_command(&mut self.device, &IdCodeRequest::new(self.dap_index))?;
        response.status.into_result()?;
        tracing::info!(
            "Debug port is TAP {} with IDCODE {:#010x}",
            self.dap_index,
            response.idcode
        );

        Ok(&self.jtag_devices)
    }

    fn connect(&mut self, request: ConnectRequest) -> Result<(), DebugProbeError> {
        let response = send_command(&mut self.device, &request)?;
        match (request, response) {
            (_, ConnectResponse::InitFailed) => Err(CmsisDapError::ConnectFailed.into()),
            (ConnectRequest::UseSWD, ConnectResponse::SuccessfulInitForJTAG)
            | (ConnectRequest::UseJTAG, ConnectResponse::SuccessfulInitForSWD) => {
                Err(CmsisDapError::ConnectFailed.into())
            }
            _ => {
                tracing::debug!("Connected: {:?}", response);
                Ok(())
            }
        }
    }

    fn host_status(&mut self, led: Led, on: bool) -> Result<(), DebugProbeError> {
        send_command(&mut self.device, &HostStatusRequest::new(led, on))?
            .0
            .into_result()?;
        Ok(())
    }

    fn swj_sequence(&mut self, request: SequenceRequest) -> Result<(), DebugProbeError> {
        send_command(&mut self.device, &request)?.0.into_result()?;
        Ok(())
    }

    /// Line reset, switch code, line reset and idle.
    fn swj_switch(&mut self, code: [u8; 2]) -> Result<(), DebugProbeError> {
        self.swj_sequence(SequenceRequest::new(&[0xFF; 7])?)?;
        self.swj_sequence(SequenceRequest::new(&code)?)?;
        self.swj_sequence(SequenceRequest::new(&[0xFF; 7])?)?;
        self.swj_sequence(SequenceRequest::new(&[0x00])?)
    }

    fn jtag_to_swd(&mut self) -> Result<(), DebugProbeError> {
        tracing::debug!("Switching SWJ-DP to SWD");
        self.swj_switch(JTAG_TO_SWD)
    }

    fn swd_to_jtag(&mut self) -> Result<(), DebugProbeError> {
        tracing::debug!("Switching SWJ-DP to JTAG");
        self.swj_switch(SWD_TO_JTAG)
    }

    fn transfer(&mut self, request: TransferRequest) -> Result<TransferResponse, ArmError> {
        let response = send_command(&mut self.device, &request)?;

        if response.protocol_error {
            return Err(DapError::SwdProtocol.into());
        }
        match response.ack {
            Ack::Ok => Ok(response),
            Ack::Wait => Err(DapError::WaitResponse.into()),
            Ack::Fault => Err(DapError::FaultResponse.into()),
            Ack::None => Err(DapError::NoAcknowledge.into()),
        }
    }
}

/// Length of a chain flushed with zeros and then refilled with ones: the number of zeros
/// that come out of the second half before the first one.
fn chain_length(captured: &BitSlice<u8, Lsb0>) -> Option<usize> {
    let refill = captured.get(MAX_SCAN_CHAIN_BITS..)?;
    match refill.first_one() {
        Some(0) | None => None,
        Some(length) => Some(length),
    }
}

impl RawDapAccess for CmsisDap {
    fn raw_read_register(&mut self, port: PortType, addr: u8) -> Result<u32, ArmError> {
        let response = self.transfer(TransferRequest::read(self.dap_index, port, addr))?;
        let value = response
            .values
            .first()
            .copied()
            .ok_or(DapError::SwdProtocol)?;
        tracing::trace!("{:?} read {:#04x} = {:#010x}", port, addr, value);
        Ok(value)
    }

    fn raw_write_register(
        &mut self,
        port: PortType,
        addr: u8,
        value: u32,
    ) -> Result<(), ArmError> {
        tracing::trace!("{:?} write {:#04x} = {:#010x}", port, addr, value);
        self.transfer(TransferRequest::write(self.dap_index, port, addr, value))?;
        Ok(())
    }

    fn raw_write_abort(&mut self, abort: u32) -> Result<(), ArmError> {
        if self.connection_type.is_jtag() {
            let request = WriteAbortRequest {
                dap_index: self.dap_index,
                abort,
            };
            send_command(&mut self.device, &request)?.0.into_result()?;
            Ok(())
        } else {
            self.raw_write_register(PortType::DebugPort, Abort::ADDRESS, abort)
        }
    }

    fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }
}
