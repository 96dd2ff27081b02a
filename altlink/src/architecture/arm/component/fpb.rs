//! Flash patch and breakpoint unit of ARMv7-M cores.

use std::fmt;

use bitfield::bitfield;

use super::{
    check_breakpoint_address, BreakpointUnit, Comparator, ComparatorSlots, DebugRegister,
};
use crate::architecture::arm::{memory::MemoryInterface, ArmError};

bitfield! {
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct FpCtrl(u32);
    impl Debug;
    pub u8, num_code1, _: 14, 12;
    pub u8, num_lit, _: 11, 8;
    pub u8, num_code0, _: 7, 4;
    pub key, set_key: 1;
    pub enable, set_enable: 0;
}

debug_register!(FpCtrl, 0x000, "FP_CTRL");

impl FpCtrl {
    /// Number of instruction address comparators.
    pub fn num_code(&self) -> usize {
        usize::from(self.num_code0()) + (usize::from(self.num_code1()) << 4)
    }
}

bitfield! {
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct FpRemap(u32);
    impl Debug;
    /// Whether remapping to SRAM is supported at all.
    pub rmpspt, _: 29;
    pub u32, remap, _: 28, 5;
}

debug_register!(FpRemap, 0x004, "FP_REMAP");

impl FpRemap {
    /// SRAM address of the remap table.
    pub fn remap_address(&self) -> u32 {
        0x2000_0000 | (self.remap() << 5)
    }
}

impl fmt::Display for FpRemap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rmpspt() {
            write!(f, "FP_REMAP : {:#010x}", self.remap_address())
        } else {
            write!(f, "FP_REMAP : not supported")
        }
    }
}

#[derive(Debug)]
pub struct Fpb {
    ap: u8,
    base: u32,
    ctrl: Option<FpCtrl>,
    remap: Option<FpRemap>,
    slots: ComparatorSlots,
}

impl Fpb {
    pub fn new(ap: u8, base: u32) -> Self {
        Self {
            ap,
            base,
            ctrl: None,
            remap: None,
            slots: ComparatorSlots::default(),
        }
    }

    pub fn ap(&self) -> u8 {
        self.ap
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn is_enabled(&self) -> bool {
        self.ctrl.map_or(false, |ctrl| ctrl.enable())
    }

    /// Number of literal comparators, zero before `init`.
    pub fn num_lit(&self) -> usize {
        self.ctrl.map_or(0, |ctrl| usize::from(ctrl.num_lit()))
    }

    pub fn remap(&self) -> Option<FpRemap> {
        self.remap
    }

    pub fn enable(&mut self, memory: &mut dyn MemoryInterface) -> Result<(), ArmError> {
        let mut ctrl = self.ctrl.ok_or(ArmError::UnitNotInitialized("FPB"))?;
        ctrl.set_key(true);
        ctrl.set_enable(true);
        ctrl.store(memory, self.base)?;
        self.ctrl = Some(ctrl);
        tracing::debug!("FPB at {:#010x} enabled", self.base);
        Ok(())
    }

    pub fn breakpoints(&self) -> Vec<u32> {
        self.slots.addresses()
    }
}

impl BreakpointUnit for Fpb {
    fn init(&mut self, memory: &mut dyn MemoryInterface) -> Result<(), ArmError> {
        let ctrl = FpCtrl::load(memory, self.base)?;
        let remap = FpRemap::load(memory, self.base)?;
        self.slots = ComparatorSlots::read(memory, self.base, ctrl.num_code())?;
        self.ctrl = Some(ctrl);
        self.remap = Some(remap);
        tracing::debug!(
            "FPB at {:#010x}: {} code and {} literal comparators, {}",
            self.base,
            ctrl.num_code(),
            ctrl.num_lit(),
            remap
        );
        Ok(())
    }

    fn comparator_count(&self) -> usize {
        self.slots.len()
    }

    fn add_breakpoint(
        &mut self,
        memory: &mut dyn MemoryInterface,
        address: u32,
    ) -> Result<(), ArmError> {
        if self.ctrl.is_none() {
            return Err(ArmError::UnitNotInitialized("FPB"));
        }
        check_breakpoint_address(address)?;
        if self.slots.position(address).is_some() {
            return Ok(());
        }
        let unit = self.slots.free().ok_or(ArmError::NoFreeComparator)?;

        if !self.is_enabled() {
            self.enable(memory)?;
        }
        self.slots
            .program(memory, self.base, unit, Comparator::for_address(address))
    }

    fn remove_breakpoint(
        &mut self,
        memory: &mut dyn MemoryInterface,
        address: u32,
    ) -> Result<(), ArmError> {
        match self.slots.position(address) {
            Some(unit) => self
                .slots
                .program(memory, self.base, unit, Comparator::default()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use test_case::test_case;

    use super::*;
    use crate::architecture::arm::memory::mock::MockMemoryAp;

    const FPB_BASE: u32 = 0xE000_2000;

    #[test_case(0x0000_0260 => (6, 2); "cortex-m3")]
    #[test_case(0x0000_1260 => (22, 2); "upper count bits")]
    fn comparator_counts(ctrl: u32) -> (usize, u8) {
        let ctrl = FpCtrl(ctrl);
        (ctrl.num_code(), ctrl.num_lit())
    }

    #[test]
    fn remap_address_is_in_sram() {
        let remap = FpRemap(0x2000_0000 | (0x100 << 5));

        assert!(remap.rmpspt());
        assert_eq!(remap.remap_address(), 0x2000_2000);
        assert_eq!(remap.to_string(), "FP_REMAP : 0x20002000");
    }

    #[test]
    fn init_reads_ctrl_remap_and_comparators() {
        let mut memory = MockMemoryAp::new();
        memory.store(FPB_BASE, &[0x0000_0261, 0x2000_0000]);
        let mut fpb = Fpb::new(0, FPB_BASE);

        fpb.init(&mut memory).unwrap();

        assert_eq!(fpb.comparator_count(), 6);
        assert_eq!(fpb.num_lit(), 2);
        assert!(fpb.is_enabled());
        assert_eq!(fpb.remap().map(|r| r.remap_address()), Some(0x2000_0000));
        assert_eq!(memory.reads.len(), 2 + 6);
    }

    #[test]
    fn breakpoint_round_trip() {
        let mut memory = MockMemoryAp::new();
        memory.store(FPB_BASE, &[0x0000_0020]);
        let mut fpb = Fpb::new(0, FPB_BASE);
        fpb.init(&mut memory).unwrap();

        fpb.add_breakpoint(&mut memory, 0x0800_0104).unwrap();
        assert_eq!(memory.word(FPB_BASE), 0x23);
        assert_eq!(fpb.breakpoints(), vec![0x0800_0104]);

        fpb.remove_breakpoint(&mut memory, 0x0800_0104).unwrap();
        assert!(fpb.breakpoints().is_empty());
        assert_eq!(memory.word(FPB_BASE + 0x8), 0);
    }

    #[test]
    fn removing_unknown_breakpoint_is_fine() {
        let mut memory = MockMemoryAp::new();
        memory.store(FPB_BASE, &[0x0000_0020]);
        let mut fpb = Fpb::new(0, FPB_BASE);
        fpb.init(&mut memory).unwrap();

        fpb.remove_breakpoint(&mut memory, 0x100).unwrap();

        assert!(memory.writes.is_empty());
    }
}
