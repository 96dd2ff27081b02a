use std::{
    collections::HashMap,
    fmt::Debug,
    thread,
    time::{Duration, Instant},
};

use super::{
    ap::{ApInformation, ApRegister, Csw, Idr, MemoryApInformation},
    dp::{Abort, Ctrl, DpIdr, DpRegister, Select},
    memory::{ApMemory, MemoryInterface},
    ArmMemoryPorts, PortType, RawDapAccess,
};
use crate::probe::{cmsisdap::commands::CmsisDapError, DebugProbeError};

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum DapError {
    #[error("An error occurred in the SWD communication between probe and device.")]
    SwdProtocol,
    #[error("Target device did not respond to request.")]
    NoAcknowledge,
    #[error("Target device responded with FAULT response to request.")]
    FaultResponse,
    #[error("Target device responded with WAIT response to request.")]
    WaitResponse,
    #[error("Target power-up failed.")]
    TargetPowerUpFailed,
    #[error("Timeout waiting for the debug power-up acknowledge.")]
    PowerUpTimeout,
}

impl DapError {
    /// Errors which a sticky flag clear can recover from.
    ///
    /// WAIT is retried by the probe firmware according to the transfer configuration
    /// and is final once it reaches the host.
    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DapError::FaultResponse | DapError::NoAcknowledge | DapError::SwdProtocol
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArmError {
    #[error("An error occurred in the communication with the probe")]
    Probe(#[from] DebugProbeError),
    #[error("A DAP transfer failed")]
    Dap(#[from] DapError),
    #[error("Timeout waiting for {0}")]
    Timeout(&'static str),
    #[error("Core register {0} cannot be accessed")]
    InvalidCoreRegister(u16),
    #[error("The core has to be halted for this operation")]
    CoreNotHalted,
    #[error("The {0} has not been initialized")]
    UnitNotInitialized(&'static str),
    #[error("All hardware breakpoint comparators are in use")]
    NoFreeComparator,
    #[error("Address {0:#010x} cannot hold a hardware breakpoint")]
    InvalidBreakpointAddress(u32),
    #[error("Comparator {0} does not exist")]
    ComparatorOutOfRange(usize),
    #[error("No program counter sample is available")]
    NoPcSample,
    #[error("Instruction {0:#010x} aborted")]
    InstructionAbort(u32),
    #[error("Address {address:#010x} is not aligned to {alignment} bytes")]
    AlignmentError { address: u32, alignment: usize },
}

impl From<CmsisDapError> for ArmError {
    fn from(error: CmsisDapError) -> Self {
        ArmError::Probe(error.into())
    }
}

pub trait Register: Clone + From<u32> + Into<u32> + Sized + Debug {
    const ADDRESS: u8;
    const NAME: &'static str;
}

/// Cached view of one memory access port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct MemApState {
    /// Last value written to TAR.
    pub tar: Option<u32>,
    /// Last value written to or read from CSW.
    pub csw: Option<Csw>,
}

/// Everything the register layer remembers between accesses.
///
/// The state outlives a single [`ArmCommunicationInterface`], which only borrows it together
/// with the probe.
#[derive(Debug)]
pub struct ArmCommunicationInterfaceState {
    /// The `(ap, bank)` pair currently programmed into SELECT, `None` if unknown.
    select: Option<(u8, u8)>,
    mem_aps: HashMap<u8, MemApState>,
    idrs: HashMap<u8, Idr>,
    power_up_timeout: Duration,
}

impl ArmCommunicationInterfaceState {
    pub fn new(power_up_timeout: Duration) -> Self {
        Self {
            select: None,
            mem_aps: HashMap::new(),
            idrs: HashMap::new(),
            power_up_timeout,
        }
    }

    /// Forget every cached register value, e.g. after the wire protocol changed.
    pub fn invalidate(&mut self) {
        self.select = None;
        self.mem_aps.clear();
        self.idrs.clear();
    }
}

/// DP and AP register access on top of a [`RawDapAccess`] probe.
pub struct ArmCommunicationInterface<'probe> {
    probe: &'probe mut dyn RawDapAccess,
    state: &'probe mut ArmCommunicationInterfaceState,
}

impl<'probe> ArmCommunicationInterface<'probe> {
    pub fn new(
        probe: &'probe mut dyn RawDapAccess,
        state: &'probe mut ArmCommunicationInterfaceState,
    ) -> Self {
        Self { probe, state }
    }

    pub fn read_dp_register<R: DpRegister>(&mut self) -> Result<R, ArmError> {
        let value = self.probe.raw_read_register(PortType::DebugPort, R::ADDRESS)?;
        tracing::trace!("Read DP register {}, value={:#010x}", R::NAME, value);
        Ok(R::from(value))
    }

    pub fn write_dp_register<R: DpRegister>(&mut self, register: R) -> Result<(), ArmError> {
        let value = register.into();
        tracing::trace!("Write DP register {}, value={:#010x}", R::NAME, value);
        self.probe
            .raw_write_register(PortType::DebugPort, R::ADDRESS, value)
    }

    pub fn read_idcode(&mut self) -> Result<DpIdr, ArmError> {
        self.read_dp_register()
    }

    pub fn read_ap_register<R: ApRegister>(&mut self, ap: u8) -> Result<R, ArmError> {
        let value = self.read_raw_ap_register(ap, R::ADDRESS)?;
        tracing::trace!("Read AP {} register {}, value={:#010x}", ap, R::NAME, value);
        Ok(R::from(value))
    }

    pub fn write_ap_register<R: ApRegister>(&mut self, ap: u8, register: R) -> Result<(), ArmError> {
        let value = register.into();
        tracing::trace!("Write AP {} register {}, value={:#010x}", ap, R::NAME, value);
        self.write_raw_ap_register(ap, R::ADDRESS, value)
    }

    /// Read an AP register, clearing sticky errors and retrying once if the access fails.
    pub fn read_raw_ap_register(&mut self, ap: u8, address: u8) -> Result<u32, ArmError> {
        match self.read_ap_once(ap, address) {
            Err(ArmError::Dap(error)) if error.is_recoverable() => {
                tracing::warn!(
                    "Reading AP {} register {:#04x} failed: {}, retrying",
                    ap,
                    address,
                    error
                );
                self.clear_sticky_errors(ap)?;
                self.read_ap_once(ap, address)
            }
            result => result,
        }
    }

    /// Write an AP register, clearing sticky errors and retrying once if the access fails.
    pub fn write_raw_ap_register(&mut self, ap: u8, address: u8, value: u32) -> Result<(), ArmError> {
        match self.write_ap_once(ap, address, value) {
            Err(ArmError::Dap(error)) if error.is_recoverable() => {
                tracing::warn!(
                    "Writing AP {} register {:#04x} failed: {}, retrying",
                    ap,
                    address,
                    error
                );
                self.clear_sticky_errors(ap)?;
                self.write_ap_once(ap, address, value)
            }
            result => result,
        }
    }

    fn read_ap_once(&mut self, ap: u8, address: u8) -> Result<u32, ArmError> {
        self.select_ap_and_bank(ap, address)?;
        self.probe
            .raw_read_register(PortType::AccessPort, address & 0x0C)
    }

    fn write_ap_once(&mut self, ap: u8, address: u8, value: u32) -> Result<(), ArmError> {
        self.select_ap_and_bank(ap, address)?;
        self.probe
            .raw_write_register(PortType::AccessPort, address & 0x0C, value)
    }

    fn select_ap_and_bank(&mut self, ap: u8, address: u8) -> Result<(), ArmError> {
        let bank = address >> 4;
        if self.state.select == Some((ap, bank)) {
            return Ok(());
        }

        let mut select = Select(0);
        select.set_ap_sel(ap);
        select.set_ap_bank_sel(bank);
        tracing::debug!("Changing AP to {}, AP bank to {}", ap, bank);

        // A failed write leaves SELECT in an unknown state.
        self.state.select = None;
        self.write_dp_register(select)?;
        self.state.select = Some((ap, bank));
        Ok(())
    }

    /// Bring the debug port back into a usable state after a failed AP access.
    fn clear_sticky_errors(&mut self, ap: u8) -> Result<(), ArmError> {
        self.state.select = None;

        let ctrl: Ctrl = self.read_dp_register()?;
        tracing::debug!("CTRL/STAT after failed access: {:#010x}", ctrl.0);

        if ctrl.has_sticky_error() {
            if self.probe.connection_type().is_jtag() {
                // The sticky flags of a JTAG-DP are write-one-to-clear.
                self.write_dp_register(ctrl)?;
            } else {
                self.probe.raw_write_abort(Abort::clear_sticky().into())?;
            }
        }

        if self.state.idrs.get(&ap).is_some_and(Idr::is_ahb) {
            let csw = Csw(self.read_ap_once(ap, Csw::ADDRESS)?);
            if !csw.master_debug() || !csw.hprot1() {
                let mut forced = csw;
                forced.set_master_debug(true);
                forced.set_hprot1(true);
                tracing::debug!("Forcing privileged debug access on AP {}", ap);
                self.write_ap_once(ap, Csw::ADDRESS, forced.0)?;
                self.mem_ap_state(ap).csw = Some(forced);
            }
        }

        Ok(())
    }

    /// Request debug power and wait for the acknowledge.
    #[tracing::instrument(skip(self))]
    pub fn power_up_debug(&mut self) -> Result<(), ArmError> {
        let mut ctrl: Ctrl = self.read_dp_register()?;
        tracing::debug!("{}", ctrl);

        if ctrl.cdbgpwrupack() {
            return Ok(());
        }

        // Writing ones would clear the sticky flags of a JTAG-DP.
        ctrl.set_sticky_cmp(false);
        ctrl.set_sticky_err(false);
        ctrl.set_sticky_orun(false);
        ctrl.set_cdbgpwrupreq(true);
        self.write_dp_register(ctrl)?;

        let start = Instant::now();
        loop {
            let ctrl: Ctrl = self.read_dp_register()?;
            if ctrl.cdbgpwrupack() {
                tracing::info!("Debug power-up acknowledged");
                return Ok(());
            }
            if !ctrl.cdbgpwrupreq() {
                return Err(DapError::TargetPowerUpFailed.into());
            }
            if start.elapsed() >= self.state.power_up_timeout {
                return Err(DapError::PowerUpTimeout.into());
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Read IDR, and BASE and CSW for memory access ports, of every AP up to the first empty one.
    #[tracing::instrument(skip(self))]
    pub fn scan_access_ports(&mut self) -> Result<Vec<ApInformation>, ArmError> {
        let mut access_ports = Vec::new();

        for port in 0..u8::MAX {
            let idr: Idr = self.read_ap_register(port)?;
            if idr.0 == 0 {
                break;
            }
            self.state.idrs.insert(port, idr);

            let memory = if idr.is_memory_ap() {
                let base = self.read_ap_register(port)?;
                let csw: Csw = self.read_ap_register(port)?;
                self.mem_ap_state(port).csw = Some(csw);
                Some(MemoryApInformation { base, csw })
            } else {
                None
            };

            let information = ApInformation { port, idr, memory };
            tracing::info!("AP {}: {}", port, idr.kind_name());
            tracing::debug!("{}", information);
            access_ports.push(information);
        }

        Ok(access_ports)
    }

    /// Memory access through the memory access port `ap`.
    pub fn memory_ap(&mut self, ap: u8) -> ApMemory<'_, 'probe> {
        ApMemory::new(self, ap)
    }

    pub(crate) fn mem_ap_state(&mut self, ap: u8) -> &mut MemApState {
        self.state.mem_aps.entry(ap).or_default()
    }
}

impl ArmMemoryPorts for ArmCommunicationInterface<'_> {
    fn memory(&mut self, ap: u8) -> Box<dyn MemoryInterface + '_> {
        Box::new(self.memory_ap(ap))
    }
}
