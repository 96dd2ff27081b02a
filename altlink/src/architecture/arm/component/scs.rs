//! System control space of ARMv6-M and ARMv7-M cores.
//!
//! Run control goes through DHCSR, core registers are transferred through DCRSR and DCRDR
//! while the core is halted.

use std::{
    fmt, thread,
    time::{Duration, Instant},
};

use bitfield::bitfield;
use serde::Serialize;

use super::DebugRegister;
use crate::architecture::arm::{memory::MemoryInterface, ArmError};

/// DCRSR selector of the register combining CONTROL, FAULTMASK, BASEPRI and PRIMASK.
pub const CONTROL_PRIMASK: u16 = 20;

const DBGKEY: u32 = 0xA05F << 16;

bitfield! {
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Cpuid(u32);
    impl Debug;
    pub u8, implementer, _: 31, 24;
    pub u8, variant, _: 23, 20;
    pub u8, architecture, _: 19, 16;
    pub u16, partno, _: 15, 4;
    pub u8, revision, _: 3, 0;
}

debug_register!(Cpuid, 0xD00, "CPUID");

impl Cpuid {
    pub fn implementer_name(&self) -> &'static str {
        match self.implementer() {
            0x41 => "ARM",
            0x44 => "DEC",
            0x4D => "Motorola/Freescale",
            0x51 => "QUALCOMM",
            0x56 => "Marvell",
            0x69 => "Intel",
            _ => "UNKNOWN",
        }
    }

    pub fn architecture_name(&self) -> &'static str {
        match self.architecture() {
            0x1 => "ARMv4",
            0x2 => "ARMv4T",
            0x3 => "ARMv5",
            0x4 => "ARMv5T",
            0x5 => "ARMv5TE",
            0x6 => "ARMv5TEJ",
            0x7 => "ARMv6",
            0xC => "ARMv6-M",
            0xF => "ARMv7",
            _ => "UNKNOWN",
        }
    }

    pub fn part_name(&self) -> &'static str {
        match self.partno() {
            0xC05 => "Cortex-A5",
            0xC07 => "Cortex-A7",
            0xC08 => "Cortex-A8",
            0xC09 => "Cortex-A9",
            0xC0D => "Cortex-A12",
            0xC0E => "Cortex-A17",
            0xC0F => "Cortex-A15",
            0xC14 => "Cortex-R4",
            0xC15 => "Cortex-R5",
            0xC17 => "Cortex-R7",
            0xC20 => "Cortex-M0",
            0xC21 => "Cortex-M1",
            0xC23 => "Cortex-M3",
            0xC24 => "Cortex-M4",
            0xC27 => "Cortex-M7",
            0xC60 => "Cortex-M0+",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for Cpuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CPUID          : {:#010x}", self.0)?;
        writeln!(f, "  Implementer  : {}", self.implementer_name())?;
        writeln!(f, "  Architecture : {}", self.architecture_name())?;
        writeln!(f, "  Part number  : {}", self.part_name())?;
        write!(f, "  Revision     : r{:x}p{:x}", self.variant(), self.revision())
    }
}

bitfield! {
    /// Debug fault status. The flags are write-one-to-clear.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Dfsr(u32);
    impl Debug;
    pub external, _: 4;
    pub vcatch, _: 3;
    pub dwttrap, _: 2;
    pub bkpt, _: 1;
    pub halted, _: 0;
}

debug_register!(Dfsr, 0xD30, "DFSR");

impl fmt::Display for Dfsr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DFSR : {:#010x} (", self.0)?;
        if self.0 == 0 {
            write!(f, "Running")?;
        }
        let flags = [
            (self.external(), "EXTERNAL"),
            (self.vcatch(), "VectorCatch"),
            (self.dwttrap(), "DWTTRAP"),
            (self.bkpt(), "BKPT"),
            (self.halted(), "HALTED"),
        ];
        let set: Vec<&str> = flags
            .iter()
            .filter(|(set, _)| *set)
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{})", set.join("/"))
    }
}

bitfield! {
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Dhcsr(u32);
    impl Debug;
    pub s_reset_st, _: 25;
    pub s_retire_st, _: 24;
    pub s_lockup, _: 19;
    pub s_sleep, _: 18;
    pub s_halt, _: 17;
    pub s_regrdy, _: 16;
    pub c_maskints, set_c_maskints: 3;
    pub c_step, set_c_step: 2;
    pub c_halt, set_c_halt: 1;
    pub c_debugen, set_c_debugen: 0;
}

debug_register!(Dhcsr, 0xDF0, "DHCSR");

impl Dhcsr {
    /// A control value carrying the debug key, without which the write is ignored.
    fn control(halt: bool, step: bool, mask_interrupts: bool) -> Self {
        let mut dhcsr = Dhcsr(DBGKEY);
        dhcsr.set_c_debugen(true);
        dhcsr.set_c_halt(halt);
        dhcsr.set_c_step(step);
        dhcsr.set_c_maskints(mask_interrupts);
        dhcsr
    }
}

impl fmt::Display for Dhcsr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DHCSR : {:#010x}", self.0)?;
        writeln!(
            f,
            "  C_DEBUGEN  : {:x} C_HALT    : {:x} C_STEP : {:x} C_MASKINTS: {:x}",
            self.c_debugen() as u8,
            self.c_halt() as u8,
            self.c_step() as u8,
            self.c_maskints() as u8
        )?;
        writeln!(
            f,
            "  S_REGRDY   : {:x} S_HALT    : {:x} S_SLEEP: {:x} S_LOCKUP  : {:x}",
            self.s_regrdy() as u8,
            self.s_halt() as u8,
            self.s_sleep() as u8,
            self.s_lockup() as u8
        )?;
        write!(
            f,
            "  S_RETIRE_ST: {:x} S_RESET_ST: {:x}",
            self.s_retire_st() as u8,
            self.s_reset_st() as u8
        )
    }
}

bitfield! {
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Dcrsr(u32);
    impl Debug;
    pub regwnr, set_regwnr: 16;
    pub u16, regsel, set_regsel: 6, 0;
}

debug_register!(Dcrsr, 0xDF4, "DCRSR");

bitfield! {
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Dcrdr(u32);
    impl Debug;
    pub u32, data, _: 31, 0;
}

debug_register!(Dcrdr, 0xDF8, "DCRDR");

bitfield! {
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Demcr(u32);
    impl Debug;
    /// DWTENA on ARMv6-M, TRCENA on ARMv7-M.
    pub trcena, set_trcena: 24;
    pub vc_harderr, set_vc_harderr: 10;
    pub vc_corereset, set_vc_corereset: 0;
}

debug_register!(Demcr, 0xDFC, "DEMCR");

impl fmt::Display for Demcr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let trap = |set: bool| if set { "trap" } else { "don't trap" };
        writeln!(f, "DEMCR : {:#010x}", self.0)?;
        writeln!(
            f,
            "  DWT         : {}",
            if self.trcena() { "enabled" } else { "disabled" }
        )?;
        writeln!(f, "  HardFault   : {}", trap(self.vc_harderr()))?;
        write!(f, "  ResetVector : {}", trap(self.vc_corereset()))
    }
}

/// One of the 8 bit registers packed into [`CONTROL_PRIMASK`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CombinedRegister {
    Primask,
    Basepri,
    Faultmask,
    Control,
}

impl CombinedRegister {
    /// The register with debugger index `index`, 19 to 22.
    pub fn from_index(index: u16) -> Option<Self> {
        match index {
            19 => Some(CombinedRegister::Primask),
            20 => Some(CombinedRegister::Basepri),
            21 => Some(CombinedRegister::Faultmask),
            22 => Some(CombinedRegister::Control),
            _ => None,
        }
    }

    fn shift(&self) -> u32 {
        match self {
            CombinedRegister::Primask => 0,
            CombinedRegister::Basepri => 8,
            CombinedRegister::Faultmask => 16,
            CombinedRegister::Control => 24,
        }
    }

    pub fn extract(&self, combined: u32) -> u32 {
        (combined >> self.shift()) & 0xFF
    }

    pub fn inject(&self, combined: u32, value: u32) -> u32 {
        (combined & !(0xFF << self.shift())) | ((value & 0xFF) << self.shift())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoreState {
    Running,
    Halted,
}

/// The registers a halted ARMv6-M or ARMv7-M core exposes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RegisterDump {
    /// r0 to r12, sp, lr and the debug return address.
    pub core: [u32; 16],
    pub xpsr: u32,
    pub msp: u32,
    pub psp: u32,
    pub control_primask: u32,
}

impl fmt::Display for RegisterDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.core;
        writeln!(
            f,
            "R0-R3 : {:#010x} {:#010x} {:#010x} {:#010x}",
            r[0], r[1], r[2], r[3]
        )?;
        writeln!(
            f,
            "R4-R7 : {:#010x} {:#010x} {:#010x} {:#010x}",
            r[4], r[5], r[6], r[7]
        )?;
        writeln!(
            f,
            "R8-R11: {:#010x} {:#010x} {:#010x} {:#010x}",
            r[8], r[9], r[10], r[11]
        )?;
        writeln!(
            f,
            "R12   : {:#010x} SP : {:#010x} LR : {:#010x} PC: {:#010x}",
            r[12], r[13], r[14], r[15]
        )?;
        write!(
            f,
            "xPSR  : {:#010x} MSP: {:#010x} PSP: {:#010x} CPM: {:#010x}",
            self.xpsr, self.msp, self.psp, self.control_primask
        )
    }
}

/// The system control space of one core.
#[derive(Debug)]
pub struct Scs {
    ap: u8,
    base: u32,
    state: CoreState,
    cpuid: Option<Cpuid>,
    timeout: Duration,
}

impl Scs {
    /// `timeout` bounds the wait for a core register transfer.
    pub fn new(ap: u8, base: u32, timeout: Duration) -> Self {
        Self {
            ap,
            base,
            state: CoreState::Running,
            cpuid: None,
            timeout,
        }
    }

    pub fn ap(&self) -> u8 {
        self.ap
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// The state set by the last run control request.
    pub fn state(&self) -> CoreState {
        self.state
    }

    pub fn read_cpuid(&mut self, memory: &mut dyn MemoryInterface) -> Result<Cpuid, ArmError> {
        if let Some(cpuid) = self.cpuid {
            return Ok(cpuid);
        }
        let cpuid = Cpuid::load(memory, self.base)?;
        self.cpuid = Some(cpuid);
        Ok(cpuid)
    }

    pub fn read_dfsr(&self, memory: &mut dyn MemoryInterface) -> Result<Dfsr, ArmError> {
        Dfsr::load(memory, self.base)
    }

    /// Clear the halt reasons reported in `dfsr`.
    pub fn clear_dfsr(&self, memory: &mut dyn MemoryInterface, dfsr: Dfsr) -> Result<(), ArmError> {
        dfsr.store(memory, self.base)
    }

    pub fn read_dhcsr(&self, memory: &mut dyn MemoryInterface) -> Result<Dhcsr, ArmError> {
        Dhcsr::load(memory, self.base)
    }

    pub fn read_demcr(&self, memory: &mut dyn MemoryInterface) -> Result<Demcr, ArmError> {
        Demcr::load(memory, self.base)
    }

    pub fn write_demcr(&self, memory: &mut dyn MemoryInterface, demcr: Demcr) -> Result<(), ArmError> {
        demcr.store(memory, self.base)
    }

    pub fn is_halted(&mut self, memory: &mut dyn MemoryInterface) -> Result<bool, ArmError> {
        let halted = self.read_dhcsr(memory)?.s_halt();
        self.state = if halted {
            CoreState::Halted
        } else {
            CoreState::Running
        };
        Ok(halted)
    }

    pub fn halt(
        &mut self,
        memory: &mut dyn MemoryInterface,
        mask_interrupts: bool,
    ) -> Result<(), ArmError> {
        Dhcsr::control(true, false, mask_interrupts).store(memory, self.base)?;
        self.state = CoreState::Halted;
        tracing::debug!("Halt requested");
        Ok(())
    }

    /// Resume the core.
    ///
    /// The interrupt mask only changes while halted, so the core is halted first if the
    /// mask differs from the current one.
    pub fn run(
        &mut self,
        memory: &mut dyn MemoryInterface,
        mask_interrupts: bool,
    ) -> Result<(), ArmError> {
        let dhcsr = self.read_dhcsr(memory)?;
        if dhcsr.c_maskints() != mask_interrupts {
            self.halt(memory, mask_interrupts)?;
        }

        Dhcsr::control(false, false, mask_interrupts).store(memory, self.base)?;
        self.state = CoreState::Running;
        tracing::debug!("Run requested");
        Ok(())
    }

    /// Execute a single instruction. The core halts again on its own.
    pub fn step(
        &mut self,
        memory: &mut dyn MemoryInterface,
        mask_interrupts: bool,
    ) -> Result<(), ArmError> {
        let dhcsr = self.read_dhcsr(memory)?;
        if !dhcsr.c_debugen() || !dhcsr.s_halt() {
            self.halt(memory, false)?;
        }

        Dhcsr::control(false, true, mask_interrupts).store(memory, self.base)?;
        self.state = CoreState::Halted;
        tracing::debug!("Step requested");
        Ok(())
    }

    fn check_selector(selector: u16) -> Result<(), ArmError> {
        match selector {
            0..=18 | CONTROL_PRIMASK => Ok(()),
            _ => Err(ArmError::InvalidCoreRegister(selector)),
        }
    }

    fn wait_for_register_ready(&self, memory: &mut dyn MemoryInterface) -> Result<(), ArmError> {
        let start = Instant::now();
        loop {
            let dhcsr = self.read_dhcsr(memory)?;
            if !dhcsr.c_halt() {
                return Err(ArmError::CoreNotHalted);
            }
            if dhcsr.s_regrdy() {
                return Ok(());
            }
            if start.elapsed() >= self.timeout {
                return Err(ArmError::Timeout("DHCSR.S_REGRDY"));
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Read the core register with DCRSR selector `selector`.
    pub fn read_core_reg(
        &mut self,
        memory: &mut dyn MemoryInterface,
        selector: u16,
    ) -> Result<u32, ArmError> {
        Self::check_selector(selector)?;

        let mut dcrsr = Dcrsr(0);
        dcrsr.set_regsel(selector);
        dcrsr.store(memory, self.base)?;
        self.wait_for_register_ready(memory)?;

        let value = Dcrdr::load(memory, self.base)?.data();
        tracing::trace!("Core register {}: {:#010x}", selector, value);
        Ok(value)
    }

    /// Write the core register with DCRSR selector `selector`.
    pub fn write_core_reg(
        &mut self,
        memory: &mut dyn MemoryInterface,
        selector: u16,
        value: u32,
    ) -> Result<(), ArmError> {
        Self::check_selector(selector)?;

        Dcrdr(value).store(memory, self.base)?;
        let mut dcrsr = Dcrsr(0);
        dcrsr.set_regsel(selector);
        dcrsr.set_regwnr(true);
        dcrsr.store(memory, self.base)?;
        self.wait_for_register_ready(memory)
    }

    /// Read a register by debugger index, splitting out the registers packed into
    /// [`CONTROL_PRIMASK`] for indices 19 to 22.
    pub fn read_register(
        &mut self,
        memory: &mut dyn MemoryInterface,
        index: u16,
    ) -> Result<u32, ArmError> {
        match CombinedRegister::from_index(index) {
            Some(register) => {
                let combined = self.read_core_reg(memory, CONTROL_PRIMASK)?;
                Ok(register.extract(combined))
            }
            None => self.read_core_reg(memory, index),
        }
    }

    /// Write a register by debugger index. Indices 19 to 22 only change their own byte of
    /// [`CONTROL_PRIMASK`].
    pub fn write_register(
        &mut self,
        memory: &mut dyn MemoryInterface,
        index: u16,
        value: u32,
    ) -> Result<(), ArmError> {
        match CombinedRegister::from_index(index) {
            Some(register) => {
                let combined = self.read_core_reg(memory, CONTROL_PRIMASK)?;
                self.write_core_reg(memory, CONTROL_PRIMASK, register.inject(combined, value))
            }
            None => self.write_core_reg(memory, index, value),
        }
    }

    pub fn dump_registers(
        &mut self,
        memory: &mut dyn MemoryInterface,
    ) -> Result<RegisterDump, ArmError> {
        let mut dump = RegisterDump::default();
        for (selector, value) in dump.core.iter_mut().enumerate() {
            *value = self.read_core_reg(memory, selector as u16)?;
        }
        dump.xpsr = self.read_core_reg(memory, 16)?;
        dump.msp = self.read_core_reg(memory, 17)?;
        dump.psp = self.read_core_reg(memory, 18)?;
        dump.control_primask = self.read_core_reg(memory, CONTROL_PRIMASK)?;
        Ok(dump)
    }
}
