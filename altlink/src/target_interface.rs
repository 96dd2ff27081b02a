//! Run control, registers and memory of a target, as consumed by debugger front ends.

use std::time::Duration;

use serde::Serialize;

use crate::architecture::arm::{
    component::{BreakpointUnit, Bpu, Dwt, DwtCounters, DwtVersion, Fpb, RegisterDump, Scs},
    core::Armv7arDebugInterface,
    memory::romtable::Topology,
    ArmMemoryPorts, MemoryInterface,
};
use crate::error::Error;

/// Number of PC samples logged for every ARMv7-A/R core during discovery.
const PC_SAMPLES: usize = 20;

/// Register layout of an ARMv6-M or ARMv7-M core in the format debuggers request through
/// `qXfer:features:read:target.xml`.
pub const TARGET_XML: &str = concat!(
    r#"<?xml version="1.0"?><!DOCTYPE target SYSTEM "gdb-target.dtd">"#,
    r#"<target version="1.0">"#,
    r#"<feature name="org.gnu.gdb.arm.m-profile">"#,
    r#"<reg name="r0" bitsize="32" regnum="0" type="int" group="general"/>"#,
    r#"<reg name="r1" bitsize="32" regnum="1" type="int" group="general"/>"#,
    r#"<reg name="r2" bitsize="32" regnum="2" type="int" group="general"/>"#,
    r#"<reg name="r3" bitsize="32" regnum="3" type="int" group="general"/>"#,
    r#"<reg name="r4" bitsize="32" regnum="4" type="int" group="general"/>"#,
    r#"<reg name="r5" bitsize="32" regnum="5" type="int" group="general"/>"#,
    r#"<reg name="r6" bitsize="32" regnum="6" type="int" group="general"/>"#,
    r#"<reg name="r7" bitsize="32" regnum="7" type="int" group="general"/>"#,
    r#"<reg name="r8" bitsize="32" regnum="8" type="int" group="general"/>"#,
    r#"<reg name="r9" bitsize="32" regnum="9" type="int" group="general"/>"#,
    r#"<reg name="r10" bitsize="32" regnum="10" type="int" group="general"/>"#,
    r#"<reg name="r11" bitsize="32" regnum="11" type="int" group="general"/>"#,
    r#"<reg name="r12" bitsize="32" regnum="12" type="int" group="general"/>"#,
    r#"<reg name="sp" bitsize="32" regnum="13" type="data_ptr" group="general"/>"#,
    r#"<reg name="lr" bitsize="32" regnum="14" type="int" group="general"/>"#,
    r#"<reg name="pc" bitsize="32" regnum="15" type="code_ptr" group="general"/>"#,
    r#"<reg name="xPSR" bitsize="32" regnum="16" type="int" group="general"/>"#,
    r#"</feature>"#,
    r#"<feature name="org.gnu.gdb.arm.m-system">"#,
    r#"<reg name="msp" bitsize="32" regnum="17" type="data_ptr" group="system"/>"#,
    r#"<reg name="psp" bitsize="32" regnum="18" type="data_ptr" group="system"/>"#,
    r#"<reg name="primask" bitsize="1" regnum="19" type="int8" group="system"/>"#,
    r#"<reg name="basepri" bitsize="8" regnum="20" type="int8" group="system"/>"#,
    r#"<reg name="faultmask" bitsize="1" regnum="21" type="int8" group="system"/>"#,
    r#"<reg name="control" bitsize="3" regnum="22" type="int8" group="system"/>"#,
    r#"</feature>"#,
    r#"</target>"#,
);

/// Number of registers in the generic register block.
pub const GENERIC_REGISTER_COUNT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointType {
    /// A breakpoint instruction patched into memory.
    Memory,
    /// An address comparator of a breakpoint unit.
    Hardware,
}

/// The instruction encoding a breakpoint is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointKind {
    Thumb16 = 2,
    Thumb32 = 3,
    Arm32 = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchpointType {
    Write,
    Read,
    Access,
}

/// Stop signal reported to the debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Signal {
    /// Stopped from outside: an external debug request or a vector catch.
    Int,
    /// Stopped by the debugger: a halt request, a step, a breakpoint or a watchpoint.
    Trap,
}

impl Signal {
    /// The POSIX signal number.
    pub fn number(&self) -> u8 {
        match self {
            Signal::Int => 2,
            Signal::Trap => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Running,
    Halted(Signal),
}

/// The capabilities a debugger front end needs from a target.
///
/// Registers are addressed by debugger index: 0 to 15 are the core registers, 16 is the
/// program status register, 17 and 18 the stack pointers and 19 to 22 PRIMASK, BASEPRI,
/// FAULTMASK and CONTROL.
pub trait TargetInterface {
    /// Halt the core for a debug session.
    fn attach(&mut self) -> Result<(), Error>;

    /// Let the core run freely again.
    fn detach(&mut self) -> Result<(), Error>;

    /// Select the thread further requests apply to. Targets without threads accept anything.
    fn set_target_thread_id(&mut self) {}

    fn set_current_pc(&mut self, _address: u64) {}

    fn resume(&mut self) -> Result<(), Error>;

    /// Execute a single instruction.
    fn step(&mut self) -> Result<Signal, Error>;

    /// Stop a running core.
    fn interrupt(&mut self) -> Result<Signal, Error>;

    /// Poll the run state and, if halted, the reason why.
    fn is_running(&mut self) -> Result<RunState, Error>;

    fn set_breakpoint(
        &mut self,
        kind: BreakpointType,
        address: u64,
        encoding: BreakpointKind,
    ) -> Result<(), Error>;

    fn unset_breakpoint(
        &mut self,
        kind: BreakpointType,
        address: u64,
        encoding: BreakpointKind,
    ) -> Result<(), Error>;

    fn set_watchpoint(
        &mut self,
        _kind: WatchpointType,
        _address: u64,
        _length: u32,
    ) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    fn unset_watchpoint(
        &mut self,
        _kind: WatchpointType,
        _address: u64,
        _length: u32,
    ) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    fn read_register(&mut self, index: u32) -> Result<u32, Error>;

    /// Read a register into a 64 bit value, zero extended.
    fn read_register_64(&mut self, index: u32) -> Result<u64, Error> {
        self.read_register(index).map(u64::from)
    }

    /// Read a register as the low and high half of a 128 bit value.
    fn read_register_128(&mut self, index: u32) -> Result<(u64, u64), Error> {
        self.read_register(index).map(|value| (u64::from(value), 0))
    }

    fn write_register(&mut self, index: u32, value: u32) -> Result<(), Error>;

    /// Write a register from a 64 bit value, which has to fit into 32 bits.
    fn write_register_64(&mut self, index: u32, value: u64) -> Result<(), Error> {
        let value = u32::try_from(value).map_err(|_| {
            Error::InvalidArgument(format!(
                "{value:#x} does not fit into 32 bit register {index}"
            ))
        })?;
        self.write_register(index, value)
    }

    /// Write a register from the halves of a 128 bit value, which has to fit into 32 bits.
    fn write_register_128(&mut self, index: u32, low: u64, high: u64) -> Result<(), Error> {
        if high != 0 {
            return Err(Error::InvalidArgument(format!(
                "upper half {high:#x} of register {index} has to be zero"
            )));
        }
        self.write_register_64(index, low)
    }

    /// Read registers 0 to 15.
    fn read_generic_registers(&mut self) -> Result<Vec<u32>, Error> {
        (0..GENERIC_REGISTER_COUNT as u32)
            .map(|index| self.read_register(index))
            .collect()
    }

    /// Write registers 0 to 15, in order.
    fn write_generic_registers(&mut self, values: &[u32]) -> Result<(), Error> {
        if values.len() != GENERIC_REGISTER_COUNT {
            return Err(Error::InvalidArgument(format!(
                "expected {} generic registers, got {}",
                GENERIC_REGISTER_COUNT,
                values.len()
            )));
        }
        for (index, value) in values.iter().enumerate() {
            self.write_register(index as u32, *value)?;
        }
        Ok(())
    }

    /// Read `length` bytes at any alignment.
    fn read_memory(&mut self, address: u64, length: usize) -> Result<Vec<u8>, Error>;

    /// Read `count` words starting at the word aligned `address`.
    fn read_memory_32(&mut self, address: u64, count: usize) -> Result<Vec<u32>, Error>;

    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<(), Error>;

    /// Run a debugger monitor command and return its output.
    fn monitor(&mut self, command: &str) -> Result<String, Error> {
        tracing::info!("monitor [{}]", command);
        Ok(String::new())
    }

    /// A window of [`TARGET_XML`]. Windows past the end are empty.
    fn target_xml(&self, offset: usize, length: usize) -> &'static str {
        let start = offset.min(TARGET_XML.len());
        let end = offset.saturating_add(length).min(TARGET_XML.len());
        TARGET_XML.get(start..end).unwrap_or_default()
    }
}

/// The units the run control works with, taken from a discovered [`Topology`].
#[derive(Debug, Default)]
pub struct DebugUnits {
    pub scs: Option<Scs>,
    pub dwt: Option<Dwt>,
    pub bpu: Option<Bpu>,
    pub fpb: Option<Fpb>,
    pub difs: Vec<Armv7arDebugInterface>,
    /// The access port used for target memory.
    pub sysmem_ap: Option<u8>,
}

impl DebugUnits {
    /// Pick the first unit of each kind from `topology` and initialize it.
    ///
    /// Failing units are logged and left out, they never fail the whole discovery.
    pub fn from_topology(
        ports: &mut dyn ArmMemoryPorts,
        topology: &Topology,
        operation_timeout: Duration,
    ) -> Self {
        let mut units = DebugUnits {
            sysmem_ap: topology.sysmem_aps().first().copied(),
            ..Default::default()
        };

        for handle in topology.find(|c| c.is_armv7ar_debug()) {
            let mut dif =
                Armv7arDebugInterface::new(topology.component(handle), operation_timeout);
            let mut memory = ports.memory(dif.ap());
            if let Err(error) = dif.init(&mut *memory) {
                tracing::warn!("Failed to initialize DIF at {:#010x}: {}", dif.base(), error);
                continue;
            }
            for _ in 0..PC_SAMPLES {
                let sample = dif
                    .pc_sample(&mut *memory)
                    .and_then(|pc| Ok((pc, dif.read_cidsr(&mut *memory)?)));
                match sample {
                    Ok((pc, cid)) => tracing::debug!("PC(SR): {:#010x}, CID(SR): {:#010x}", pc, cid),
                    Err(error) => {
                        tracing::debug!("No PC sample: {}", error);
                        break;
                    }
                }
            }
            if let Ok(dscr) = dif.read_dscr(&mut *memory) {
                tracing::debug!("{:?}", dscr);
            }
            units.difs.push(dif);
        }

        if let Some(&handle) = topology.find(|c| c.is_scs()).first() {
            let component = topology.component(handle);
            let mut scs = Scs::new(component.ap, component.base, operation_timeout);
            let mut memory = ports.memory(scs.ap());
            match scs.read_cpuid(&mut *memory) {
                Ok(cpuid) => tracing::info!("{}", cpuid),
                Err(error) => tracing::warn!("Failed to read CPUID: {}", error),
            }
            if let Ok(demcr) = scs.read_demcr(&mut *memory) {
                tracing::debug!("{}", demcr);
            }
            if let Ok(dfsr) = scs.read_dfsr(&mut *memory) {
                tracing::debug!("{}", dfsr);
            }
            if let Ok(dhcsr) = scs.read_dhcsr(&mut *memory) {
                tracing::debug!("{}", dhcsr);
            }
            units.scs = Some(scs);
        }

        let dwt = [
            (DwtVersion::V6M, topology.find(|c| c.is_armv6m_dwt())),
            (DwtVersion::V7M, topology.find(|c| c.is_armv7m_dwt())),
        ]
        .into_iter()
        .filter_map(|(version, found)| found.first().map(|&handle| (version, handle)))
        .last();
        if let Some((version, handle)) = dwt {
            let component = topology.component(handle);
            let dwt = Dwt::new(component.ap, component.base, version);
            let mut memory = ports.memory(dwt.ap());
            if let Err(error) = dwt.pc_sample(&mut *memory) {
                tracing::warn!("Failed to read DWT_PCSR: {}", error);
            }
            match dwt.ctrl(&mut *memory) {
                Ok(ctrl) => tracing::debug!("{}", ctrl),
                Err(error) => tracing::warn!("Failed to read DWT_CTRL: {}", error),
            }
            units.dwt = Some(dwt);
        }

        if let Some(&handle) = topology.find(|c| c.is_bpu()).first() {
            let component = topology.component(handle);
            let mut bpu = Bpu::new(component.ap, component.base);
            match bpu.init(&mut *ports.memory(bpu.ap())) {
                Ok(()) => units.bpu = Some(bpu),
                Err(error) => tracing::warn!("Failed to initialize BPU: {}", error),
            }
        }

        if let Some(&handle) = topology.find(|c| c.is_fpb()).first() {
            let component = topology.component(handle);
            let mut fpb = Fpb::new(component.ap, component.base);
            match fpb.init(&mut *ports.memory(fpb.ap())) {
                Ok(()) => units.fpb = Some(fpb),
                Err(error) => tracing::warn!("Failed to initialize FPB: {}", error),
            }
        }

        units
    }
}

/// Registers of one ARMv7-A/R core captured while halted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DifRegisters {
    pub index: usize,
    /// r0 to r14, `None` where the read failed.
    pub registers: Vec<Option<u32>>,
    pub pc: Option<u32>,
}

/// What [`AdiTargetInterface::test_halt_and_run`] saw while the cores were halted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HaltAndRunReport {
    pub difs: Vec<DifRegisters>,
    pub scs: Option<RegisterDump>,
}

/// The target interface of an ADIv5 debug port.
///
/// Run control and registers go through the SCS of an ARMv6-M or ARMv7-M core,
/// breakpoints through its BPU or FPB and memory through the system memory access port.
pub struct AdiTargetInterface<'units, P: ArmMemoryPorts> {
    ports: P,
    units: &'units mut DebugUnits,
}

impl<'units, P: ArmMemoryPorts> AdiTargetInterface<'units, P> {
    pub fn new(ports: P, units: &'units mut DebugUnits) -> Self {
        Self { ports, units }
    }

    fn scs(&mut self) -> Result<(&mut Scs, Box<dyn MemoryInterface + '_>), Error> {
        let scs = self.units.scs.as_mut().ok_or(Error::MissingUnit("SCS"))?;
        let memory = self.ports.memory(scs.ap());
        Ok((scs, memory))
    }

    fn sysmem(&mut self, address: u64) -> Result<(u32, Box<dyn MemoryInterface + '_>), Error> {
        let address = u32::try_from(address).map_err(|_| {
            Error::InvalidArgument(format!("address {address:#x} is outside the 32 bit space"))
        })?;
        let ap = self
            .units
            .sysmem_ap
            .ok_or(Error::MissingUnit("system memory access port"))?;
        Ok((address, self.ports.memory(ap)))
    }

    fn breakpoint_unit(
        &mut self,
    ) -> Result<(&mut dyn BreakpointUnit, Box<dyn MemoryInterface + '_>), Error> {
        let (unit, ap): (&mut dyn BreakpointUnit, u8) =
            match (self.units.bpu.as_mut(), self.units.fpb.as_mut()) {
                (Some(bpu), _) => {
                    let ap = bpu.ap();
                    (bpu as &mut dyn BreakpointUnit, ap)
                }
                (None, Some(fpb)) => {
                    let ap = fpb.ap();
                    (fpb as &mut dyn BreakpointUnit, ap)
                }
                (None, None) => return Err(Error::NotSupported),
            };
        Ok((unit, self.ports.memory(ap)))
    }

    fn breakpoint_address(kind: BreakpointType, address: u64) -> Result<u32, Error> {
        if kind == BreakpointType::Memory {
            return Err(Error::NotSupported);
        }
        u32::try_from(address).map_err(|_| {
            Error::InvalidArgument(format!("breakpoint address {address:#x} is out of range"))
        })
    }

    /// Whether the DWT registers are accessible, i.e. DEMCR.TRCENA is set.
    pub fn is_dwt_enabled(&mut self) -> Result<bool, Error> {
        let (scs, mut memory) = self.scs()?;
        Ok(scs.read_demcr(&mut *memory)?.trcena())
    }

    /// Set DEMCR.TRCENA. Returns whether the register had to change.
    pub fn enable_dwt(&mut self) -> Result<bool, Error> {
        let (scs, mut memory) = self.scs()?;
        let mut demcr = scs.read_demcr(&mut *memory)?;
        if demcr.trcena() {
            return Ok(false);
        }
        demcr.set_trcena(true);
        scs.write_demcr(&mut *memory, demcr)?;
        tracing::info!("DWT enabled");
        Ok(true)
    }

    /// The profiling counters of an ARMv7-M DWT.
    pub fn dwt_counters(&mut self) -> Result<Option<DwtCounters>, Error> {
        let dwt = self.units.dwt.ok_or(Error::MissingUnit("DWT"))?;
        let mut memory = self.ports.memory(dwt.ap());
        Ok(dwt.counters(&mut *memory)?)
    }

    /// Halt every core, capture its registers and let it run again.
    ///
    /// ARMv7-A/R cores which fail to halt are skipped. The SCS core is always resumed, even
    /// when the register dump fails.
    #[tracing::instrument(skip(self))]
    pub fn test_halt_and_run(&mut self) -> Result<HaltAndRunReport, Error> {
        let mut report = HaltAndRunReport::default();

        let mut halted = Vec::with_capacity(self.units.difs.len());
        for (index, dif) in self.units.difs.iter_mut().enumerate() {
            tracing::info!("Halting CPU {}", index);
            let mut memory = self.ports.memory(dif.ap());
            match dif.halt(&mut *memory) {
                Ok(()) => halted.push(index),
                Err(error) => tracing::warn!("Failed to halt CPU {}: {}", index, error),
            }
        }

        for &index in &halted {
            let dif = &mut self.units.difs[index];
            let mut memory = self.ports.memory(dif.ap());
            let registers = (0..15)
                .map(|register| dif.read_register(&mut *memory, register).ok())
                .collect();
            let pc = dif.read_pc(&mut *memory).ok();
            report.difs.push(DifRegisters {
                index,
                registers,
                pc,
            });
        }

        for &index in &halted {
            tracing::info!("Restarting CPU {}", index);
            let dif = &mut self.units.difs[index];
            let mut memory = self.ports.memory(dif.ap());
            if let Err(error) = dif.run(&mut *memory) {
                tracing::warn!("Failed to restart CPU {}: {}", index, error);
            }
        }

        if let Some(scs) = self.units.scs.as_mut() {
            let mut memory = self.ports.memory(scs.ap());
            // Core registers are only readable in debug state.
            scs.halt(&mut *memory, false)?;
            let dump = scs.dump_registers(&mut *memory);
            scs.run(&mut *memory, false)?;
            let dump = dump?;
            tracing::info!("Registers:\n{}", dump);
            report.scs = Some(dump);
        }

        Ok(report)
    }
}

impl<P: ArmMemoryPorts> TargetInterface for AdiTargetInterface<'_, P> {
    fn attach(&mut self) -> Result<(), Error> {
        let (scs, mut memory) = self.scs()?;
        Ok(scs.halt(&mut *memory, false)?)
    }

    fn detach(&mut self) -> Result<(), Error> {
        let (scs, mut memory) = self.scs()?;
        Ok(scs.run(&mut *memory, false)?)
    }

    fn resume(&mut self) -> Result<(), Error> {
        let (scs, mut memory) = self.scs()?;
        Ok(scs.run(&mut *memory, false)?)
    }

    fn step(&mut self) -> Result<Signal, Error> {
        let (scs, mut memory) = self.scs()?;
        scs.step(&mut *memory, false)?;
        Ok(Signal::Trap)
    }

    fn interrupt(&mut self) -> Result<Signal, Error> {
        let (scs, mut memory) = self.scs()?;
        scs.halt(&mut *memory, false)?;
        Ok(Signal::Trap)
    }

    fn is_running(&mut self) -> Result<RunState, Error> {
        let (scs, mut memory) = self.scs()?;
        if !scs.is_halted(&mut *memory)? {
            return Ok(RunState::Running);
        }

        let dfsr = scs.read_dfsr(&mut *memory)?;
        if u32::from(dfsr) == 0 {
            return Ok(RunState::Running);
        }

        tracing::debug!("Stopped, {}", dfsr);
        if dfsr.external() || dfsr.vcatch() {
            Ok(RunState::Halted(Signal::Int))
        } else {
            Ok(RunState::Halted(Signal::Trap))
        }
    }

    fn set_breakpoint(
        &mut self,
        kind: BreakpointType,
        address: u64,
        _encoding: BreakpointKind,
    ) -> Result<(), Error> {
        let address = Self::breakpoint_address(kind, address)?;
        let (unit, mut memory) = self.breakpoint_unit()?;
        Ok(unit.add_breakpoint(&mut *memory, address)?)
    }

    fn unset_breakpoint(
        &mut self,
        kind: BreakpointType,
        address: u64,
        _encoding: BreakpointKind,
    ) -> Result<(), Error> {
        let address = Self::breakpoint_address(kind, address)?;
        let (unit, mut memory) = self.breakpoint_unit()?;
        Ok(unit.remove_breakpoint(&mut *memory, address)?)
    }

    fn read_register(&mut self, index: u32) -> Result<u32, Error> {
        let index = register_index(index)?;
        let (scs, mut memory) = self.scs()?;
        Ok(scs.read_register(&mut *memory, index)?)
    }

    fn write_register(&mut self, index: u32, value: u32) -> Result<(), Error> {
        let index = register_index(index)?;
        let (scs, mut memory) = self.scs()?;
        Ok(scs.write_register(&mut *memory, index, value)?)
    }

    fn read_memory(&mut self, address: u64, length: usize) -> Result<Vec<u8>, Error> {
        let (address, mut memory) = self.sysmem(address)?;
        let mut data = vec![0; length];
        memory.read_8(address, &mut data)?;
        Ok(data)
    }

    fn read_memory_32(&mut self, address: u64, count: usize) -> Result<Vec<u32>, Error> {
        let (address, mut memory) = self.sysmem(address)?;
        if address % 4 != 0 {
            return Err(Error::InvalidArgument(format!(
                "address {address:#010x} is not word aligned"
            )));
        }
        (0..count as u32)
            .map(|i| Ok(memory.read_word_32(address.wrapping_add(4 * i))?))
            .collect()
    }

    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<(), Error> {
        let (address, mut memory) = self.sysmem(address)?;
        Ok(memory.write_8(address, data)?)
    }
}

fn register_index(index: u32) -> Result<u16, Error> {
    u16::try_from(index)
        .map_err(|_| Error::InvalidArgument(format!("register index {index} is out of range")))
}

#[cfg(test)]
mod test {
    use test_case::test_case;

    use super::*;
    use crate::architecture::arm::{
        ap::{ApInformation, Base, Csw, Idr, MemoryApInformation},
        component::{FakeCortexM, CONTROL_PRIMASK},
        memory::{mock::MockMemoryAp, romtable::part},
    };

    const SCS_AP: u8 = 0;
    const SYSMEM_AP: u8 = 1;
    const FPB_BASE: u32 = 0xE000_2000;

    /// A Cortex-M core on AP 0 and plain memory on AP 1.
    #[derive(Default)]
    struct Ports {
        core: FakeCortexM,
        memory: MockMemoryAp,
    }

    impl ArmMemoryPorts for Ports {
        fn memory(&mut self, ap: u8) -> Box<dyn MemoryInterface + '_> {
            match ap {
                SCS_AP => Box::new(&mut self.core),
                _ => Box::new(&mut self.memory),
            }
        }
    }

    fn units() -> DebugUnits {
        DebugUnits {
            scs: Some(Scs::new(SCS_AP, 0xE000_E000, Duration::from_millis(10))),
            sysmem_ap: Some(SYSMEM_AP),
            ..Default::default()
        }
    }

    #[test]
    fn attach_halts_and_detach_runs() {
        let mut units = units();
        let mut ports = Ports::default();
        let mut ti = AdiTargetInterface::new(&mut ports, &mut units);

        ti.attach().unwrap();
        ti.detach().unwrap();

        assert!(!ports.core.halted);
        assert_eq!(ports.core.dhcsr_writes, vec![0xA05F_0003, 0xA05F_0001]);
    }

    #[test]
    fn running_core_reports_running() {
        let mut units = units();
        let mut ports = Ports::default();
        let mut ti = AdiTargetInterface::new(&mut ports, &mut units);

        assert_eq!(ti.is_running().unwrap(), RunState::Running);
    }

    #[test_case(0x00 => RunState::Running; "no halt reason")]
    #[test_case(0x01 => RunState::Halted(Signal::Trap); "halt request")]
    #[test_case(0x02 => RunState::Halted(Signal::Trap); "breakpoint")]
    #[test_case(0x04 => RunState::Halted(Signal::Trap); "watchpoint")]
    #[test_case(0x08 => RunState::Halted(Signal::Int); "vector catch")]
    #[test_case(0x10 => RunState::Halted(Signal::Int); "external")]
    fn halt_reason_maps_to_signal(dfsr: u32) -> RunState {
        let mut units = units();
        let mut ports = Ports::default();
        ports.core.halted = true;
        ports.core.debugen = true;
        ports.core.dfsr = dfsr;
        let mut ti = AdiTargetInterface::new(&mut ports, &mut units);

        ti.is_running().unwrap()
    }

    #[test]
    fn step_and_interrupt_report_trap() {
        let mut units = units();
        let mut ports = Ports::default();
        let mut ti = AdiTargetInterface::new(&mut ports, &mut units);

        assert_eq!(ti.interrupt().unwrap().number(), 5);
        assert_eq!(ti.step().unwrap(), Signal::Trap);
        assert!(ports.core.halted);
    }

    #[test]
    fn missing_scs_is_reported() {
        let mut units = DebugUnits::default();
        let mut ports = Ports::default();
        let mut ti = AdiTargetInterface::new(&mut ports, &mut units);

        assert!(matches!(ti.attach(), Err(Error::MissingUnit("SCS"))));
        assert!(matches!(ti.read_register(0), Err(Error::MissingUnit(_))));
    }

    #[test]
    fn generic_registers_round_trip() {
        let mut units = units();
        let mut ports = Ports::default();
        let mut ti = AdiTargetInterface::new(&mut ports, &mut units);
        ti.attach().unwrap();

        let values: Vec<u32> = (0..16).map(|i| 0x1000 + i).collect();
        ti.write_generic_registers(&values).unwrap();

        assert_eq!(ti.read_generic_registers().unwrap(), values);
    }

    #[test]
    fn generic_registers_need_all_sixteen() {
        let mut units = units();
        let mut ports = Ports::default();
        let mut ti = AdiTargetInterface::new(&mut ports, &mut units);

        assert!(matches!(
            ti.write_generic_registers(&[0; 15]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn wide_register_reads_are_zero_extended() {
        let mut units = units();
        let mut ports = Ports::default();
        ports.core.registers[CONTROL_PRIMASK as usize] = 0x0200_0001;
        let mut ti = AdiTargetInterface::new(&mut ports, &mut units);
        ti.attach().unwrap();

        assert_eq!(ti.read_register_64(22).unwrap(), 0x02);
        assert_eq!(ti.read_register_128(19).unwrap(), (0x01, 0));
    }

    #[test]
    fn wide_register_writes_must_fit() {
        let mut units = units();
        let mut ports = Ports::default();
        let mut ti = AdiTargetInterface::new(&mut ports, &mut units);
        ti.attach().unwrap();

        ti.write_register_64(3, 0xDEAD_BEEF).unwrap();
        assert_eq!(ti.read_register(3).unwrap(), 0xDEAD_BEEF);

        assert!(matches!(
            ti.write_register_64(3, 0x1_0000_0000),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            ti.write_register_128(3, 0, 1),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn memory_goes_through_the_system_memory_port() {
        let mut units = units();
        let mut ports = Ports::default();
        ports.memory.store(0x2000_0000, &[0x4433_2211, 0x8877_6655]);
        let mut ti = AdiTargetInterface::new(&mut ports, &mut units);

        assert_eq!(
            ti.read_memory(0x2000_0001, 6).unwrap(),
            vec![0x22, 0x33, 0x44, 0x55, 0x66, 0x77]
        );
        assert_eq!(
            ti.read_memory_32(0x2000_0000, 2).unwrap(),
            vec![0x4433_2211, 0x8877_6655]
        );
        ti.write_memory(0x2000_0006, &[0xAA, 0xBB, 0xCC]).unwrap();

        assert_eq!(ports.memory.word(0x2000_0004), 0xBBAA_6655);
        assert_eq!(ports.memory.word(0x2000_0008), 0x0000_00CC);
    }

    #[test]
    fn memory_access_is_checked() {
        let mut units = units();
        let mut ports = Ports::default();
        let mut ti = AdiTargetInterface::new(&mut ports, &mut units);

        assert!(matches!(
            ti.read_memory(0x1_0000_0000, 4),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            ti.read_memory_32(0x2000_0002, 1),
            Err(Error::InvalidArgument(_))
        ));

        let mut units = DebugUnits::default();
        let mut ti = AdiTargetInterface::new(&mut ports, &mut units);
        assert!(matches!(
            ti.write_memory(0x2000_0000, &[0]),
            Err(Error::MissingUnit(_))
        ));
    }

    #[test]
    fn hardware_breakpoints_use_the_fpb() {
        let mut units = units();
        let mut ports = Ports::default();
        ports.memory.store(FPB_BASE, &[0x0000_0020]);
        let mut fpb = Fpb::new(SYSMEM_AP, FPB_BASE);
        fpb.init(&mut ports.memory).unwrap();
        units.fpb = Some(fpb);
        let mut ti = AdiTargetInterface::new(&mut ports, &mut units);

        ti.set_breakpoint(BreakpointType::Hardware, 0x0800_0104, BreakpointKind::Thumb16)
            .unwrap();
        assert_eq!(ports.memory.word(FPB_BASE + 0x8), 0x4800_0105);

        let mut ti = AdiTargetInterface::new(&mut ports, &mut units);
        ti.unset_breakpoint(BreakpointType::Hardware, 0x0800_0104, BreakpointKind::Thumb16)
            .unwrap();
        assert_eq!(ports.memory.word(FPB_BASE + 0x8), 0);
    }

    #[test]
    fn unsupported_break_and_watchpoints() {
        let mut units = units();
        let mut ports = Ports::default();
        let mut ti = AdiTargetInterface::new(&mut ports, &mut units);

        assert!(matches!(
            ti.set_breakpoint(BreakpointType::Memory, 0x100, BreakpointKind::Thumb16),
            Err(Error::NotSupported)
        ));
        assert!(matches!(
            ti.set_breakpoint(BreakpointType::Hardware, 0x100, BreakpointKind::Thumb16),
            Err(Error::NotSupported)
        ));
        assert!(matches!(
            ti.set_watchpoint(WatchpointType::Write, 0x2000_0000, 4),
            Err(Error::NotSupported)
        ));
        assert!(matches!(
            ti.unset_watchpoint(WatchpointType::Access, 0x2000_0000, 4),
            Err(Error::NotSupported)
        ));
    }

    #[test]
    fn dwt_enable_sets_trcena_once() {
        let mut units = units();
        let mut ports = Ports::default();
        let mut ti = AdiTargetInterface::new(&mut ports, &mut units);

        assert!(!ti.is_dwt_enabled().unwrap());
        assert!(ti.enable_dwt().unwrap());
        assert!(ti.is_dwt_enabled().unwrap());
        assert!(!ti.enable_dwt().unwrap());
    }

    #[test]
    fn halt_and_run_dumps_and_resumes() {
        let mut units = units();
        let mut ports = Ports::default();
        ports.core.registers[15] = 0x0800_0200;
        let mut ti = AdiTargetInterface::new(&mut ports, &mut units);

        let report = ti.test_halt_and_run().unwrap();

        assert!(report.difs.is_empty());
        assert_eq!(report.scs.map(|dump| dump.core[15]), Some(0x0800_0200));
        assert!(!ports.core.halted);
    }

    #[test_case(0, 5 => "<?xml"; "head")]
    #[test_case(TARGET_XML.len() - 9, 100 => "</target>"; "clipped tail")]
    #[test_case(TARGET_XML.len(), 10 => ""; "at the end")]
    #[test_case(usize::MAX, 10 => ""; "far past the end")]
    fn target_xml_windows(offset: usize, length: usize) -> &'static str {
        let mut units = DebugUnits::default();
        let mut ports = Ports::default();
        AdiTargetInterface::new(&mut ports, &mut units).target_xml(offset, length)
    }

    #[test]
    fn target_xml_covers_the_system_registers() {
        assert!(TARGET_XML.contains(r#"<reg name="control" bitsize="3" regnum="22""#));
        assert!(TARGET_XML.ends_with("</target>"));
    }

    #[test]
    fn dwt_is_kept_when_pc_sampling_fails() {
        const ROM_BASE: u32 = 0xE00F_F000;
        const DWT_BASE: u32 = 0xE000_1000;
        let mut ports = Ports::default();
        ports
            .memory
            .store_identification(ROM_BASE, 0x04_000B_B4C4, 0xB105_100D);
        ports.memory.store(ROM_BASE, &[0xFFF0_2003]);
        ports.memory.store_identification(
            DWT_BASE,
            0x04_000B_B000 | u64::from(part::DWT_M0),
            0xB105_E00D,
        );
        let mut topology = Topology::default();
        topology.add_access_port(
            &mut ports.memory,
            ApInformation {
                port: SYSMEM_AP,
                idr: Idr(0x0477_0021),
                memory: Some(MemoryApInformation {
                    base: Base(ROM_BASE | 0x3),
                    csw: Csw(0x2300_0052),
                }),
            },
        );
        ports.memory.faulty.insert(DWT_BASE + 0x1C);

        let units = DebugUnits::from_topology(&mut ports, &topology, Duration::from_millis(1));

        assert!(units.dwt.is_some());
        assert!(ports.memory.reads.contains(&(DWT_BASE + 0x1C)));
    }

    #[test]
    fn empty_topology_has_no_units() {
        let mut ports = Ports::default();
        let units =
            DebugUnits::from_topology(&mut ports, &Topology::default(), Duration::from_millis(1));

        assert!(units.scs.is_none());
        assert!(units.difs.is_empty());
        assert_eq!(units.sysmem_ap, None);
    }
}
