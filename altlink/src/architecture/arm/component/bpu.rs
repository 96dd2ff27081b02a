//! Breakpoint unit of ARMv6-M cores.

use bitfield::bitfield;

use super::{
    check_breakpoint_address, BreakpointUnit, Comparator, ComparatorSlots, DebugRegister,
};
use crate::architecture::arm::{memory::MemoryInterface, ArmError};

bitfield! {
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct BpCtrl(u32);
    impl Debug;
    pub u8, num_code, _: 7, 4;
    pub key, set_key: 1;
    pub enable, set_enable: 0;
}

debug_register!(BpCtrl, 0x000, "BP_CTRL");

impl BpCtrl {
    fn enabled() -> Self {
        let mut ctrl = BpCtrl(0);
        ctrl.set_key(true);
        ctrl.set_enable(true);
        ctrl
    }
}

#[derive(Debug)]
pub struct Bpu {
    ap: u8,
    base: u32,
    ctrl: Option<BpCtrl>,
    slots: ComparatorSlots,
}

impl Bpu {
    pub fn new(ap: u8, base: u32) -> Self {
        Self {
            ap,
            base,
            ctrl: None,
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

    pub fn enable(&mut self, memory: &mut dyn MemoryInterface) -> Result<(), ArmError> {
        let ctrl = self.ctrl.ok_or(ArmError::UnitNotInitialized("BPU"))?;
        let enabled = BpCtrl(BpCtrl::enabled().0 | (ctrl.0 & !0x3));
        enabled.store(memory, self.base)?;
        self.ctrl = Some(enabled);
        tracing::debug!("BPU at {:#010x} enabled", self.base);
        Ok(())
    }

    /// Addresses of all set breakpoints.
    pub fn breakpoints(&self) -> Vec<u32> {
        self.slots.addresses()
    }
}

impl BreakpointUnit for Bpu {
    fn init(&mut self, memory: &mut dyn MemoryInterface) -> Result<(), ArmError> {
        let ctrl = BpCtrl::load(memory, self.base)?;
        self.slots = ComparatorSlots::read(memory, self.base, ctrl.num_code() as usize)?;
        self.ctrl = Some(ctrl);
        tracing::debug!(
            "BPU at {:#010x}: {} comparators, {}",
            self.base,
            self.slots.len(),
            if ctrl.enable() { "enabled" } else { "disabled" }
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
            return Err(ArmError::UnitNotInitialized("BPU"));
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
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::architecture::arm::memory::mock::MockMemoryAp;

    const BPU_BASE: u32 = 0xE000_2000;

    fn bpu_with_four_comparators(memory: &mut MockMemoryAp) -> Bpu {
        memory.store(BPU_BASE, &[0x40]);
        let mut bpu = Bpu::new(0, BPU_BASE);
        bpu.init(memory).unwrap();
        bpu
    }

    #[test]
    fn init_mirrors_comparators() {
        let mut memory = MockMemoryAp::new();
        memory.store(BPU_BASE + 0x8, &[0x4000_0101]);
        let bpu = bpu_with_four_comparators(&mut memory);

        assert_eq!(bpu.comparator_count(), 4);
        assert_eq!(bpu.breakpoints(), vec![0x100]);
        assert!(!bpu.is_enabled());
    }

    #[test]
    fn first_breakpoint_enables_the_unit() {
        let mut memory = MockMemoryAp::new();
        let mut bpu = bpu_with_four_comparators(&mut memory);

        bpu.add_breakpoint(&mut memory, 0x0000_0102).unwrap();

        assert_eq!(memory.word(BPU_BASE), 0x43);
        assert_eq!(memory.word(BPU_BASE + 0x8), 0x8000_0101);
        assert!(bpu.is_enabled());
    }

    #[test]
    fn slots_run_out_and_free_up() {
        let mut memory = MockMemoryAp::new();
        let mut bpu = bpu_with_four_comparators(&mut memory);

        for address in [0x100, 0x200, 0x300, 0x400] {
            bpu.add_breakpoint(&mut memory, address).unwrap();
        }
        assert!(matches!(
            bpu.add_breakpoint(&mut memory, 0x500),
            Err(ArmError::NoFreeComparator)
        ));

        bpu.remove_breakpoint(&mut memory, 0x200).unwrap();
        assert_eq!(memory.word(BPU_BASE + 0xC), 0);

        bpu.add_breakpoint(&mut memory, 0x500).unwrap();
        assert_eq!(bpu.breakpoints(), vec![0x100, 0x500, 0x300, 0x400]);
    }

    #[test]
    fn existing_breakpoint_is_not_programmed_twice() {
        let mut memory = MockMemoryAp::new();
        let mut bpu = bpu_with_four_comparators(&mut memory);

        bpu.add_breakpoint(&mut memory, 0x100).unwrap();
        let writes = memory.writes.len();
        bpu.add_breakpoint(&mut memory, 0x100).unwrap();

        assert_eq!(memory.writes.len(), writes);
    }

    #[test]
    fn breakpoints_need_init() {
        let mut memory = MockMemoryAp::new();
        let mut bpu = Bpu::new(0, BPU_BASE);

        assert!(matches!(
            bpu.add_breakpoint(&mut memory, 0x100),
            Err(ArmError::UnitNotInitialized(_))
        ));
    }
}
