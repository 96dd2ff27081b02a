//! Debug units of ARMv6-M and ARMv7-M cores found through the ROM table.

mod bpu;
mod dwt;
mod fpb;
mod scs;

use std::fmt::Debug;

use bitfield::bitfield;

pub use bpu::{Bpu, BpCtrl};
pub use dwt::{Dwt, DwtCounters, DwtCtrl, DwtVersion};
pub use fpb::{FpCtrl, FpRemap, Fpb};
pub use scs::{
    CombinedRegister, CoreState, Cpuid, Demcr, Dfsr, Dhcsr, RegisterDump, Scs,
    CONTROL_PRIMASK,
};

#[cfg(test)]
pub(crate) use scs::test::FakeCortexM;

use super::{memory::MemoryInterface, ArmError};

/// A register of a debug unit, addressed relative to the unit's base.
pub trait DebugRegister: Clone + From<u32> + Into<u32> + Sized + Debug {
    const ADDRESS: u32;
    const NAME: &'static str;

    fn load(memory: &mut dyn MemoryInterface, base: u32) -> Result<Self, ArmError> {
        let value = memory.read_word_32(base + Self::ADDRESS)?;
        tracing::trace!("Read {}: {:#010x}", Self::NAME, value);
        Ok(Self::from(value))
    }

    /// Load the `unit`th register of an array of consecutive words.
    fn load_unit(
        memory: &mut dyn MemoryInterface,
        base: u32,
        unit: usize,
    ) -> Result<Self, ArmError> {
        Ok(Self::from(
            memory.read_word_32(base + Self::ADDRESS + 4 * unit as u32)?,
        ))
    }

    fn store(&self, memory: &mut dyn MemoryInterface, base: u32) -> Result<(), ArmError> {
        let value: u32 = self.clone().into();
        tracing::trace!("Write {}: {:#010x}", Self::NAME, value);
        memory.write_word_32(base + Self::ADDRESS, value)
    }

    fn store_unit(
        &self,
        memory: &mut dyn MemoryInterface,
        base: u32,
        unit: usize,
    ) -> Result<(), ArmError> {
        memory.write_word_32(base + Self::ADDRESS + 4 * unit as u32, self.clone().into())
    }
}

/// A unit that sets hardware breakpoints through address comparators.
pub trait BreakpointUnit {
    /// Read the control register and mirror all comparators.
    fn init(&mut self, memory: &mut dyn MemoryInterface) -> Result<(), ArmError>;

    fn comparator_count(&self) -> usize;

    /// Set a breakpoint at `address`. Setting an existing breakpoint again does nothing.
    fn add_breakpoint(
        &mut self,
        memory: &mut dyn MemoryInterface,
        address: u32,
    ) -> Result<(), ArmError>;

    /// Clear the breakpoint at `address`, if there is one.
    fn remove_breakpoint(
        &mut self,
        memory: &mut dyn MemoryInterface,
        address: u32,
    ) -> Result<(), ArmError>;
}

bitfield! {
    /// BP_COMPn of a BPU and FP_COMPn of a version 1 FPB share this layout.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Comparator(u32);
    impl Debug;
    /// Which half words of the matched word hit: 1 lower, 2 upper, 3 both.
    pub u8, replace, set_replace: 31, 30;
    pub u32, comp, set_comp: 28, 2;
    pub enable, set_enable: 0;
}

debug_register!(Comparator, 0x008, "COMP");

impl Comparator {
    const LOWER_HALF: u8 = 0b01;
    const UPPER_HALF: u8 = 0b10;

    /// The comparator value hitting the Thumb instruction at `address`.
    fn for_address(address: u32) -> Self {
        let mut comparator = Comparator(0);
        comparator.set_comp((address & 0x1FFF_FFFC) >> 2);
        comparator.set_replace(half_word(address));
        comparator.set_enable(true);
        comparator
    }

    fn matches(&self, address: u32) -> bool {
        self.enable()
            && self.comp() == (address & 0x1FFF_FFFC) >> 2
            && self.replace() == half_word(address)
    }
}

fn half_word(address: u32) -> u8 {
    if address & 0x2 != 0 {
        Comparator::UPPER_HALF
    } else {
        Comparator::LOWER_HALF
    }
}

/// Breakpoints must sit on a half word in the code region, 0x00000000 to 0x1FFFFFFF.
fn check_breakpoint_address(address: u32) -> Result<(), ArmError> {
    if address & 0x1 != 0 || address & 0xE000_0000 != 0 {
        return Err(ArmError::InvalidBreakpointAddress(address));
    }
    Ok(())
}

/// Host side mirror of the comparators of a breakpoint unit.
#[derive(Debug, Default)]
struct ComparatorSlots {
    comparators: Vec<Comparator>,
}

impl ComparatorSlots {
    fn read(
        memory: &mut dyn MemoryInterface,
        base: u32,
        count: usize,
    ) -> Result<Self, ArmError> {
        let comparators = (0..count)
            .map(|unit| Comparator::load_unit(memory, base, unit))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { comparators })
    }

    fn len(&self) -> usize {
        self.comparators.len()
    }

    fn position(&self, address: u32) -> Option<usize> {
        self.comparators.iter().position(|c| c.matches(address))
    }

    fn free(&self) -> Option<usize> {
        self.comparators.iter().position(|c| !c.enable())
    }

    fn program(
        &mut self,
        memory: &mut dyn MemoryInterface,
        base: u32,
        unit: usize,
        comparator: Comparator,
    ) -> Result<(), ArmError> {
        if unit >= self.comparators.len() {
            return Err(ArmError::ComparatorOutOfRange(unit));
        }
        comparator.store_unit(memory, base, unit)?;
        self.comparators[unit] = comparator;
        Ok(())
    }

    fn addresses(&self) -> Vec<u32> {
        self.comparators
            .iter()
            .filter(|c| c.enable())
            .map(|c| {
                let upper = if c.replace() == Comparator::UPPER_HALF { 2 } else { 0 };
                (c.comp() << 2) | upper
            })
            .collect()
    }
}
