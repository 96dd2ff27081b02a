//! Data watchpoint and trace unit.

use std::fmt;

use bitfield::bitfield;
use serde::Serialize;

use super::DebugRegister;
use crate::architecture::arm::{memory::MemoryInterface, ArmError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DwtVersion {
    /// ARMv6-M: comparators and PC sampling only.
    V6M,
    /// ARMv7-M: adds the profiling counters.
    V7M,
}

bitfield! {
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct DwtCtrl(u32);
    impl Debug;
    pub u8, numcomp, _: 31, 28;
    pub notrcpkt, _: 27;
    pub noexttrig, _: 26;
    pub nocyccnt, _: 25;
    pub noprfcnt, _: 24;
    pub cycevtena, _: 22;
    pub foldevtena, _: 21;
    pub lsuevtena, _: 20;
    pub sleepevtena, _: 19;
    pub excevtena, _: 18;
    pub cpievtena, _: 17;
    pub exctrcena, _: 16;
    pub pcsamplena, _: 12;
    pub cyccntena, _: 0;
}

debug_register!(DwtCtrl, 0x000, "DWT_CTRL");

impl fmt::Display for DwtCtrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let supported = |missing: bool| if missing { "no" } else { "yes" };
        writeln!(f, "DWT_CTRL : {:#010x}", self.0)?;
        writeln!(f, "  Comparators      : {}", self.numcomp())?;
        writeln!(f, "  Trace packets    : {}", supported(self.notrcpkt()))?;
        writeln!(f, "  External trigger : {}", supported(self.noexttrig()))?;
        writeln!(f, "  Cycle counter    : {}", supported(self.nocyccnt()))?;
        write!(f, "  Profile counters : {}", supported(self.noprfcnt()))
    }
}

bitfield! {
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Pcsr(u32);
    impl Debug;
    pub u32, eiasample, _: 31, 0;
}

debug_register!(Pcsr, 0x01C, "DWT_PCSR");

const CYCCNT: u32 = 0x004;
const CPICNT: u32 = 0x008;
const EXCCNT: u32 = 0x00C;
const SLEEPCNT: u32 = 0x010;
const LSUCNT: u32 = 0x014;
const FOLDCNT: u32 = 0x018;

/// Profiling counters of an ARMv7-M DWT. All but the cycle counter are 8 bit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DwtCounters {
    pub cycles: u32,
    pub cpi: u8,
    pub exceptions: u8,
    pub sleep: u8,
    pub lsu: u8,
    pub folded: u8,
}

impl fmt::Display for DwtCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CYCCNT   : {}", self.cycles)?;
        writeln!(f, "CPICNT   : {}", self.cpi)?;
        writeln!(f, "EXCCNT   : {}", self.exceptions)?;
        writeln!(f, "SLEEPCNT : {}", self.sleep)?;
        writeln!(f, "LSUCNT   : {}", self.lsu)?;
        write!(f, "FOLDCNT  : {}", self.folded)
    }
}

/// A DWT block. Its registers only answer once DEMCR.TRCENA is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dwt {
    ap: u8,
    base: u32,
    version: DwtVersion,
}

impl Dwt {
    pub fn new(ap: u8, base: u32, version: DwtVersion) -> Self {
        Self { ap, base, version }
    }

    pub fn ap(&self) -> u8 {
        self.ap
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn version(&self) -> DwtVersion {
        self.version
    }

    pub fn ctrl(&self, memory: &mut dyn MemoryInterface) -> Result<DwtCtrl, ArmError> {
        DwtCtrl::load(memory, self.base)
    }

    /// Sample the program counter without halting the core. 0xFFFFFFFF means the core is
    /// halted or the sample is not available.
    pub fn pc_sample(&self, memory: &mut dyn MemoryInterface) -> Result<u32, ArmError> {
        let sample = Pcsr::load(memory, self.base)?.eiasample();
        tracing::debug!("PC sample: {:#010x}", sample);
        Ok(sample)
    }

    /// The profiling counters, `None` on an ARMv6-M DWT which has none.
    pub fn counters(
        &self,
        memory: &mut dyn MemoryInterface,
    ) -> Result<Option<DwtCounters>, ArmError> {
        if self.version != DwtVersion::V7M {
            return Ok(None);
        }

        let mut read = |offset: u32| memory.read_word_32(self.base + offset);
        Ok(Some(DwtCounters {
            cycles: read(CYCCNT)?,
            cpi: read(CPICNT)? as u8,
            exceptions: read(EXCCNT)? as u8,
            sleep: read(SLEEPCNT)? as u8,
            lsu: read(LSUCNT)? as u8,
            folded: read(FOLDCNT)? as u8,
        }))
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::architecture::arm::memory::mock::MockMemoryAp;

    const DWT_BASE: u32 = 0xE000_1000;

    #[test]
    fn ctrl_reports_features() {
        let mut memory = MockMemoryAp::new();
        memory.store(DWT_BASE, &[0x4200_0000]);
        let dwt = Dwt::new(0, DWT_BASE, DwtVersion::V7M);

        let ctrl = dwt.ctrl(&mut memory).unwrap();

        assert_eq!(ctrl.numcomp(), 4);
        assert!(ctrl.nocyccnt());
        assert!(!ctrl.noprfcnt());
    }

    #[test]
    fn pc_sample_reads_pcsr() {
        let mut memory = MockMemoryAp::new();
        memory.store(DWT_BASE + 0x1C, &[0x0800_01C4]);
        let dwt = Dwt::new(0, DWT_BASE, DwtVersion::V6M);

        assert_eq!(dwt.pc_sample(&mut memory).unwrap(), 0x0800_01C4);
        assert_eq!(memory.reads, vec![DWT_BASE + 0x1C]);
    }

    #[test]
    fn counters_only_on_armv7m() {
        let mut memory = MockMemoryAp::new();
        memory.store(
            DWT_BASE + 0x4,
            &[100_000, 0x1_02, 0x03, 0x04, 0x05, 0x06],
        );

        let v6m = Dwt::new(0, DWT_BASE, DwtVersion::V6M);
        assert_eq!(v6m.counters(&mut memory).unwrap(), None);
        assert!(memory.reads.is_empty());

        let v7m = Dwt::new(0, DWT_BASE, DwtVersion::V7M);
        assert_eq!(
            v7m.counters(&mut memory).unwrap(),
            Some(DwtCounters {
                cycles: 100_000,
                cpi: 0x02,
                exceptions: 0x03,
                sleep: 0x04,
                lsu: 0x05,
                folded: 0x06,
            })
        );
    }
}
