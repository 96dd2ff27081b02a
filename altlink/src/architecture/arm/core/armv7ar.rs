//! Memory mapped debug interface of ARMv7-A and ARMv7-R cores.
//!
//! Core registers are not memory mapped. They are moved through the debug communication
//! channel by instructions written to DBGITR while the core is in debug state.

use std::{
    fmt, thread,
    time::{Duration, Instant},
};

use bitfield::bitfield;

use super::instructions::{build_mcr_dtrtx, build_mov, build_mrc_dtrrx, build_mrs};
use crate::architecture::arm::{
    component::DebugRegister,
    memory::{
        romtable::{part, Component},
        MemoryInterface,
    },
    ArmError,
};

bitfield! {
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Dbgdidr(u32);
    impl Debug;
    pub u8, wrps, _: 31, 28;
    pub u8, brps, _: 27, 24;
    pub u8, ctx_cmps, _: 23, 20;
    pub u8, version, _: 19, 16;
    pub devid_imp, _: 15;
    pub nsuhd_imp, _: 14;
    pub pcsr_imp, _: 13;
    pub se_imp, _: 12;
    pub u8, variant, _: 7, 4;
    pub u8, revision, _: 3, 0;
}

debug_register!(Dbgdidr, 0x000, "DBGDIDR");

impl Dbgdidr {
    pub fn version_name(&self) -> &'static str {
        match self.version() {
            1 => "ARMv6, v6.0",
            2 => "ARMv6, v6.1",
            3 => "ARMv7, v7.0 Debug, all CP14 registers",
            4 => "ARMv7, v7.0 Debug, baseline CP14 registers",
            5 => "ARMv7, v7.1 Debug",
            _ => "UNKNOWN",
        }
    }

    pub fn has_devid(&self) -> bool {
        self.version() == 5 || self.devid_imp()
    }

    pub fn has_devid1(&self) -> bool {
        self.version() == 5 || (self.devid_imp() && matches!(self.version(), 3 | 4))
    }
}

impl fmt::Display for Dbgdidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DBGDIDR : {:#010x}", self.0)?;
        writeln!(f, "  Version     : {}", self.version_name())?;
        writeln!(
            f,
            "  Comparators : {} breakpoints, {} watchpoints, {} context",
            u32::from(self.brps()) + 1,
            u32::from(self.wrps()) + 1,
            u32::from(self.ctx_cmps()) + 1
        )?;
        write!(f, "  Revision    : r{:x}p{:x}", self.variant(), self.revision())
    }
}

bitfield! {
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Dbgdevid(u32);
    impl Debug;
    pub u8, pcsample, _: 3, 0;
}

debug_register!(Dbgdevid, 0xFC8, "DBGDEVID");

impl Dbgdevid {
    /// DBGPCSR at 0x0A0 is implemented.
    pub fn has_pcsr(&self) -> bool {
        matches!(self.pcsample(), 1..=3)
    }
}

bitfield! {
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Dbgdevid1(u32);
    impl Debug;
    /// 0 means samples carry the pipeline offset, 1 means they do not.
    pub u8, pcsroffset, _: 3, 0;
}

debug_register!(Dbgdevid1, 0xFC4, "DBGDEVID1");

bitfield! {
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Dbgdscr(u32);
    impl Debug;
    pub rxfull, _: 30;
    pub txfull, _: 29;
    pub rxfull_l, _: 27;
    pub txfull_l, _: 26;
    pub instrcompl_l, _: 24;
    pub itren, set_itren: 13;
    pub und_l, _: 8;
    pub adabort_l, _: 7;
    pub sdabort_l, _: 6;
    pub restarted, _: 1;
    pub halted, _: 0;
}

debug_register!(Dbgdscr, 0x088, "DBGDSCR");

impl Dbgdscr {
    fn aborted(&self) -> bool {
        self.und_l() || self.adabort_l() || self.sdabort_l()
    }
}

bitfield! {
    #[derive(Copy, Clone, PartialEq, Eq, Default)]
    pub struct Dbgdrcr(u32);
    impl Debug;
    pub cse, set_cse: 2;
    pub rrq, set_rrq: 1;
    pub hrq, set_hrq: 0;
}

debug_register!(Dbgdrcr, 0x090, "DBGDRCR");

bitfield! {
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Mpidr(u32);
    impl Debug;
    /// Multiprocessor extensions format.
    pub rao, _: 31;
    /// Uniprocessor system.
    pub u, _: 30;
    pub u8, cluster_id, _: 11, 8;
    pub u8, cpu_id, _: 1, 0;
}

debug_register!(Mpidr, 0xD14, "MPIDR");

impl fmt::Display for Mpidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.rao() {
            return write!(f, "MPIDR : {:#010x} (no multiprocessor extensions)", self.0);
        }
        write!(
            f,
            "MPIDR : {:#010x} ({}, cluster {}, CPU {})",
            self.0,
            if self.u() { "uniprocessor" } else { "multiprocessor" },
            self.cluster_id(),
            self.cpu_id()
        )
    }
}

const DBGDTRRX: u32 = 0x080;
const DBGITR: u32 = 0x084;
const DBGPCSR_LEGACY: u32 = 0x084;
const DBGDTRTX: u32 = 0x08C;
const DBGPCSR: u32 = 0x0A0;
const DBGCIDSR: u32 = 0x0A4;

/// The debug interface of one ARMv7-A or ARMv7-R core.
#[derive(Debug)]
pub struct Armv7arDebugInterface {
    ap: u8,
    base: u32,
    part: u16,
    mpidr: Option<Mpidr>,
    didr: Option<Dbgdidr>,
    devid: Option<Dbgdevid>,
    devid1: Option<Dbgdevid1>,
    halted: bool,
    timeout: Duration,
}

impl Armv7arDebugInterface {
    /// `timeout` bounds every DBGDSCR poll.
    pub fn new(component: &Component, timeout: Duration) -> Self {
        Self {
            ap: component.ap,
            base: component.base,
            part: component.pid.part(),
            mpidr: None,
            didr: None,
            devid: None,
            devid1: None,
            halted: false,
            timeout,
        }
    }

    pub fn ap(&self) -> u8 {
        self.ap
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn mpidr(&self) -> Option<Mpidr> {
        self.mpidr
    }

    pub fn didr(&self) -> Option<Dbgdidr> {
        self.didr
    }

    /// Read the identification registers.
    pub fn init(&mut self, memory: &mut dyn MemoryInterface) -> Result<(), ArmError> {
        let mpidr = Mpidr::load(memory, self.base)?;
        let didr = Dbgdidr::load(memory, self.base)?;
        self.devid = if didr.has_devid() {
            Some(Dbgdevid::load(memory, self.base)?)
        } else {
            None
        };
        self.devid1 = if didr.has_devid1() {
            Some(Dbgdevid1::load(memory, self.base)?)
        } else {
            None
        };
        self.mpidr = Some(mpidr);
        self.didr = Some(didr);

        tracing::debug!("DIF at {:#010x}: {}", self.base, mpidr);
        tracing::debug!("{}", didr);
        Ok(())
    }

    pub fn read_dscr(&self, memory: &mut dyn MemoryInterface) -> Result<Dbgdscr, ArmError> {
        Dbgdscr::load(memory, self.base)
    }

    pub fn is_halted(&mut self, memory: &mut dyn MemoryInterface) -> Result<bool, ArmError> {
        self.halted = self.read_dscr(memory)?.halted();
        Ok(self.halted)
    }

    /// Context ID sample taken alongside the last PC sample.
    pub fn read_cidsr(&self, memory: &mut dyn MemoryInterface) -> Result<u32, ArmError> {
        memory.read_word_32(self.base + DBGCIDSR)
    }

    fn wait_for(
        &self,
        memory: &mut dyn MemoryInterface,
        what: &'static str,
        ready: impl Fn(Dbgdscr) -> bool,
    ) -> Result<Dbgdscr, ArmError> {
        let start = Instant::now();
        loop {
            let dscr = self.read_dscr(memory)?;
            if ready(dscr) {
                return Ok(dscr);
            }
            if start.elapsed() >= self.timeout {
                return Err(ArmError::Timeout(what));
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn set_itr_enabled(
        &self,
        memory: &mut dyn MemoryInterface,
        enabled: bool,
    ) -> Result<(), ArmError> {
        let mut dscr = self.read_dscr(memory)?;
        dscr.set_itren(enabled);
        dscr.store(memory, self.base)
    }

    /// Request debug state and enable instruction execution through DBGITR.
    pub fn halt(&mut self, memory: &mut dyn MemoryInterface) -> Result<(), ArmError> {
        let mut drcr = Dbgdrcr::default();
        drcr.set_hrq(true);
        drcr.store(memory, self.base)?;

        self.wait_for(memory, "DBGDSCR.HALTED", |dscr| dscr.halted())?;
        self.halted = true;
        self.set_itr_enabled(memory, true)?;
        tracing::debug!("DIF at {:#010x} halted", self.base);
        Ok(())
    }

    /// Leave debug state, clearing any sticky exceptions.
    pub fn run(&mut self, memory: &mut dyn MemoryInterface) -> Result<(), ArmError> {
        self.set_itr_enabled(memory, false)?;

        let mut drcr = Dbgdrcr::default();
        drcr.set_rrq(true);
        drcr.set_cse(true);
        drcr.store(memory, self.base)?;

        self.wait_for(memory, "DBGDSCR.RESTARTED", |dscr| dscr.restarted())?;
        self.halted = false;
        tracing::debug!("DIF at {:#010x} restarted", self.base);
        Ok(())
    }

    /// Execute one A32 instruction in debug state.
    pub fn execute(
        &mut self,
        memory: &mut dyn MemoryInterface,
        instruction: u32,
    ) -> Result<(), ArmError> {
        if !self.halted {
            return Err(ArmError::CoreNotHalted);
        }

        self.wait_for(memory, "DBGDSCR.InstrCompl_l", |dscr| dscr.instrcompl_l())?;
        memory.write_word_32(self.base + DBGITR, instruction)?;
        let dscr = self.wait_for(memory, "DBGDSCR.InstrCompl_l", |dscr| dscr.instrcompl_l())?;

        if dscr.aborted() {
            let mut drcr = Dbgdrcr::default();
            drcr.set_cse(true);
            drcr.store(memory, self.base)?;
            return Err(ArmError::InstructionAbort(instruction));
        }
        Ok(())
    }

    /// Read r0 to r14.
    pub fn read_register(
        &mut self,
        memory: &mut dyn MemoryInterface,
        register: u16,
    ) -> Result<u32, ArmError> {
        if register > 14 {
            return Err(ArmError::InvalidCoreRegister(register));
        }

        self.execute(memory, build_mcr_dtrtx(register))?;
        self.wait_for(memory, "DBGDSCR.TXfull_l", |dscr| dscr.txfull_l())?;
        memory.read_word_32(self.base + DBGDTRTX)
    }

    /// Write r0 to r14.
    pub fn write_register(
        &mut self,
        memory: &mut dyn MemoryInterface,
        register: u16,
        value: u32,
    ) -> Result<(), ArmError> {
        if register > 14 {
            return Err(ArmError::InvalidCoreRegister(register));
        }

        memory.write_word_32(self.base + DBGDTRRX, value)?;
        self.wait_for(memory, "DBGDSCR.RXfull_l", |dscr| dscr.rxfull_l())?;
        self.execute(memory, build_mrc_dtrrx(register))
    }

    /// Read the address of the next instruction. Clobbers nothing, r0 is restored.
    pub fn read_pc(&mut self, memory: &mut dyn MemoryInterface) -> Result<u32, ArmError> {
        let r0 = self.read_register(memory, 0)?;

        self.execute(memory, build_mov(0, 15))?;
        let pc = self.read_register(memory, 0)?;
        self.execute(memory, build_mrs(0))?;
        let cpsr = self.read_register(memory, 0)?;

        self.write_register(memory, 0, r0)?;

        let thumb = cpsr & (1 << 5) != 0;
        Ok(pc.wrapping_sub(if thumb { 4 } else { 8 }))
    }

    /// Sample the program counter without entering debug state. 0xFFFFFFFF means no
    /// sample was available.
    pub fn pc_sample(&self, memory: &mut dyn MemoryInterface) -> Result<u32, ArmError> {
        let didr = self.didr.ok_or(ArmError::UnitNotInitialized("DIF"))?;

        let raw = if self.devid.map_or(false, |devid| devid.has_pcsr()) {
            memory.read_word_32(self.base + DBGPCSR)?
        } else if didr.pcsr_imp() {
            memory.read_word_32(self.base + DBGPCSR_LEGACY)?
        } else {
            return Err(ArmError::NoPcSample);
        };

        if raw == 0xFFFF_FFFF {
            return Ok(raw);
        }

        let offset = self.part != part::DEBUG_A9
            && self.devid1.map_or(true, |devid1| devid1.pcsroffset() == 0);
        let sample = correct_pc_sample(raw, offset);
        tracing::debug!("PC sample: {:#010x} (raw {:#010x})", sample, raw);
        Ok(sample)
    }
}

/// Strip the instruction set bits of a DBGPCSR value and, if the sample carries the
/// pipeline offset, remove it.
fn correct_pc_sample(raw: u32, offset: bool) -> u32 {
    let thumb = raw & 0x1 != 0;
    match (thumb, offset) {
        (false, true) => (raw & !0x3).wrapping_sub(8),
        (false, false) => raw & !0x3,
        (true, true) => (raw & !0x1).wrapping_sub(4),
        (true, false) => raw & !0x1,
    }
}
