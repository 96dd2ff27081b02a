//! CoreSight ROM table discovery.
//!
//! Discovered components live in a [`ComponentArena`]. ROM tables and lookups refer to them
//! through [`ComponentHandle`]s, so a component found once is never copied.

use std::{collections::HashSet, fmt};

use bitfield::bitfield;
use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;
use serde::Serialize;
use thiserror::Error;

use super::MemoryInterface;
use crate::architecture::arm::{
    ap::ApInformation, communication_interface::ArmCommunicationInterface, ArmError,
};

/// Nested tables deeper than this are not followed.
const MAX_DEPTH: usize = 8;

/// Entries occupy the first 960 words of a table.
const ENTRY_AREA_SIZE: u32 = 0xF00;

const MEMTYPE: u32 = 0xFCC;

#[derive(Error, Debug)]
pub enum RomTableError {
    #[error("Could not read the identification of the component at {address:#010x}")]
    Identification {
        address: u32,
        #[source]
        source: ArmError,
    },
    #[error("The component at {0:#010x} is not a ROM table")]
    NotARomTable(u32),
}

/// The class field of a component ID.
#[derive(Primitive, Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ComponentClass {
    GenericVerification = 0x0,
    RomTable = 0x1,
    DebugComponent = 0x9,
    PeripheralTestBlock = 0xB,
    OptimoDe = 0xD,
    GenericIp = 0xE,
    PrimeCell = 0xF,
}

impl ComponentClass {
    pub fn name(&self) -> &'static str {
        match self {
            ComponentClass::GenericVerification => "Generic verification component",
            ComponentClass::RomTable => "ROM Table",
            ComponentClass::DebugComponent => "Debug component",
            ComponentClass::PeripheralTestBlock => "Peripheral Test Block",
            ComponentClass::OptimoDe => "OptimoDE Data Engine SubSystem (DESS) component",
            ComponentClass::GenericIp => "Generic IP component",
            ComponentClass::PrimeCell => "PrimeCell peripheral",
        }
    }
}

bitfield! {
    /// Component ID, assembled from the low bytes of CIDR0..CIDR3.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct ComponentId(u32);
    impl Debug;
    pub u8, class_raw, _: 15, 12;
}

impl From<u32> for ComponentId {
    fn from(raw: u32) -> Self {
        ComponentId(raw)
    }
}

impl ComponentId {
    const PREAMBLE_MASK: u32 = 0xFFFF_0FFF;
    const PREAMBLE: u32 = 0xB105_000D;

    pub fn class(&self) -> Option<ComponentClass> {
        ComponentClass::from_u8(self.class_raw())
    }

    pub fn has_valid_preamble(&self) -> bool {
        self.0 & Self::PREAMBLE_MASK == Self::PREAMBLE
    }
}

bitfield! {
    /// Peripheral ID, assembled from the low bytes of PIDR0..PIDR4.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct PeripheralId(u64);
    impl Debug;
    pub u16, part, _: 11, 0;
    pub u8, jep106_id, _: 18, 12;
    pub jedec, _: 19;
    pub u8, revision, _: 23, 20;
    pub u8, cmod, _: 27, 24;
    pub u8, revand, _: 31, 28;
    pub u8, jep106_continuation, _: 35, 32;
    pub u8, size, _: 39, 36;
}

impl From<u64> for PeripheralId {
    fn from(raw: u64) -> Self {
        PeripheralId(raw)
    }
}

impl PeripheralId {
    pub fn is_arm(&self) -> bool {
        self.jep106_continuation() == 0x4 && self.jep106_id() == 0x3B
    }

    pub fn jep106(&self) -> Option<jep106::JEP106Code> {
        self.jedec()
            .then(|| jep106::JEP106Code::new(self.jep106_continuation(), self.jep106_id()))
    }

    pub fn designer_name(&self) -> Option<&'static str> {
        self.jep106().and_then(|code| code.get())
    }

    /// Size of the component in kilobytes.
    pub fn size_kb(&self) -> u32 {
        4 << self.size()
    }
}

/// Part numbers of ARM designed components.
pub mod part {
    pub const SCS_M3: u16 = 0x000;
    pub const ITM_M347: u16 = 0x001;
    pub const DWT_M347: u16 = 0x002;
    pub const FPB_M34: u16 = 0x003;
    pub const CTI_M7: u16 = 0x006;
    pub const SCS_M0: u16 = 0x008;
    pub const DWT_M0: u16 = 0x00A;
    pub const BPU_M0: u16 = 0x00B;
    pub const SCS_M47: u16 = 0x00C;
    pub const FPB_M7: u16 = 0x00E;
    pub const TPIU_M3: u16 = 0x923;
    pub const TPIU_M4: u16 = 0x9A1;
    pub const DEBUG_A5: u16 = 0xC05;
    pub const DEBUG_A7: u16 = 0xC07;
    pub const DEBUG_A8: u16 = 0xC08;
    pub const DEBUG_A9: u16 = 0xC09;
    pub const DEBUG_A12: u16 = 0xC0D;
    pub const DEBUG_A17: u16 = 0xC0E;
    pub const DEBUG_A15: u16 = 0xC0F;
    pub const DEBUG_R4: u16 = 0xC14;
    pub const DEBUG_R5: u16 = 0xC15;
    pub const DEBUG_R7: u16 = 0xC17;
}

/// A CoreSight component identified at a base address behind a memory access port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Component {
    pub ap: u8,
    pub base: u32,
    pub pid: PeripheralId,
    pub cid: ComponentId,
}

impl Component {
    /// Read the peripheral and component ID registers of the component at `base`.
    pub fn read(
        memory: &mut dyn MemoryInterface,
        ap: u8,
        base: u32,
    ) -> Result<Self, RomTableError> {
        let mut read = |offset: u32| {
            let address = base.wrapping_add(offset);
            memory
                .read_word_32(address)
                .map(|value| value & 0xFF)
                .map_err(|source| RomTableError::Identification { address, source })
        };

        let mut pid = 0u64;
        for (i, offset) in [0xFE0, 0xFE4, 0xFE8, 0xFEC, 0xFD0].into_iter().enumerate() {
            pid |= u64::from(read(offset)?) << (8 * i);
        }
        let mut cid = 0u32;
        for (i, offset) in [0xFF0, 0xFF4, 0xFF8, 0xFFC].into_iter().enumerate() {
            cid |= read(offset)? << (8 * i);
        }

        let component = Component {
            ap,
            base,
            pid: PeripheralId(pid),
            cid: ComponentId(cid),
        };
        if !component.cid.has_valid_preamble() {
            tracing::warn!(
                "Component at {:#010x} has an invalid CID preamble: {:#010x}",
                base,
                cid
            );
        }
        tracing::debug!("{}", component);
        Ok(component)
    }

    pub fn class(&self) -> Option<ComponentClass> {
        self.cid.class()
    }

    pub fn is_rom_table(&self) -> bool {
        self.class() == Some(ComponentClass::RomTable)
    }

    fn is_arm_part(&self, class: ComponentClass, parts: &[u16]) -> bool {
        self.class() == Some(class) && self.pid.is_arm() && parts.contains(&self.pid.part())
    }

    /// System control space of an ARMv6-M or ARMv7-M core.
    pub fn is_scs(&self) -> bool {
        self.is_arm_part(
            ComponentClass::GenericIp,
            &[part::SCS_M3, part::SCS_M0, part::SCS_M47],
        )
    }

    pub fn is_armv6m_dwt(&self) -> bool {
        self.is_arm_part(ComponentClass::GenericIp, &[part::DWT_M0])
    }

    pub fn is_armv7m_dwt(&self) -> bool {
        self.is_arm_part(ComponentClass::GenericIp, &[part::DWT_M347])
    }

    pub fn is_bpu(&self) -> bool {
        self.is_arm_part(ComponentClass::GenericIp, &[part::BPU_M0])
    }

    pub fn is_fpb(&self) -> bool {
        self.is_arm_part(ComponentClass::GenericIp, &[part::FPB_M34, part::FPB_M7])
    }

    /// Debug interface of an ARMv7-A or ARMv7-R core.
    pub fn is_armv7ar_debug(&self) -> bool {
        self.is_arm_part(
            ComponentClass::DebugComponent,
            &[
                part::DEBUG_A5,
                part::DEBUG_A7,
                part::DEBUG_A8,
                part::DEBUG_A9,
                part::DEBUG_A12,
                part::DEBUG_A15,
                part::DEBUG_A17,
                part::DEBUG_R4,
                part::DEBUG_R5,
                part::DEBUG_R7,
            ],
        )
    }

    pub fn name(&self) -> &'static str {
        let class = self.class();
        if class == Some(ComponentClass::RomTable) {
            return "ROM_TABLE";
        }
        if !self.pid.is_arm() {
            return "UNKNOWN";
        }

        match (class, self.pid.part()) {
            (Some(ComponentClass::GenericIp), part::SCS_M3) => "Cortex-M3 SCS (System Control Space)",
            (Some(ComponentClass::GenericIp), part::ITM_M347) => {
                "Cortex-M3/M4/M7 ITM (Instrumentation Trace Macrocell unit)"
            }
            (Some(ComponentClass::GenericIp), part::DWT_M347) => {
                "Cortex-M3/M4/M7 DWT (Data Watchpoint and Trace unit)"
            }
            (Some(ComponentClass::GenericIp), part::FPB_M34) => {
                "Cortex-M3/M4 FPB (Flash Patch and Breakpoint unit)"
            }
            (Some(ComponentClass::GenericIp), part::CTI_M7) => "Cortex-M7 CTI (Cross Trigger Interface)",
            (Some(ComponentClass::GenericIp), part::SCS_M0) => {
                "Cortex-M0/M0+ SCS (System Control Space)"
            }
            (Some(ComponentClass::GenericIp), part::DWT_M0) => {
                "Cortex-M0/M0+ DWT (Data Watchpoint and Trace unit)"
            }
            (Some(ComponentClass::GenericIp), part::BPU_M0) => "Cortex-M0/M0+ BPU (Break Point Unit)",
            (Some(ComponentClass::GenericIp), part::SCS_M47) => {
                "Cortex-M4/M7 (without FPU) SCS (System Control Space)"
            }
            (Some(ComponentClass::GenericIp), part::FPB_M7) => {
                "Cortex-M7 FPB (Flash Patch and Breakpoint unit)"
            }
            (Some(ComponentClass::DebugComponent), part::TPIU_M3) => {
                "Cortex-M3 TPIU (Trace Port Interface Unit)"
            }
            (Some(ComponentClass::DebugComponent), part::TPIU_M4) => {
                "Cortex-M4 TPIU (Trace Port Interface Unit)"
            }
            (Some(ComponentClass::DebugComponent), part::DEBUG_A5) => "Cortex-A5 Debug",
            (Some(ComponentClass::DebugComponent), part::DEBUG_A7) => "Cortex-A7 Debug",
            (Some(ComponentClass::DebugComponent), part::DEBUG_A8) => "Cortex-A8 Debug",
            (Some(ComponentClass::DebugComponent), part::DEBUG_A9) => "Cortex-A9 Debug",
            (Some(ComponentClass::DebugComponent), part::DEBUG_A12) => "Cortex-A12 Debug",
            (Some(ComponentClass::DebugComponent), part::DEBUG_A15) => "Cortex-A15 Debug",
            (Some(ComponentClass::DebugComponent), part::DEBUG_A17) => "Cortex-A17 Debug",
            (Some(ComponentClass::DebugComponent), part::DEBUG_R4) => "Cortex-R4 Debug",
            (Some(ComponentClass::DebugComponent), part::DEBUG_R5) => "Cortex-R5 Debug",
            (Some(ComponentClass::DebugComponent), part::DEBUG_R7) => "Cortex-R7 Debug",
            _ => "UNKNOWN",
        }
    }

    pub fn description(&self) -> ComponentDescription {
        ComponentDescription {
            address: self.base,
            name: self.name(),
            class: self.class().map(|class| class.name()),
            designer: self.pid.designer_name(),
            part: self.pid.part(),
            revision: self.pid.revision(),
            revand: self.pid.revand(),
            cmod: self.pid.cmod(),
            size_kb: self.pid.size_kb(),
            pid: self.pid.0,
            cid: self.cid.0,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Component at {:#010x} (AP {})", self.base, self.ap)?;
        writeln!(f, "  PID                 : {:#018x}", self.pid.0)?;
        writeln!(f, "    Part number       : {:x}", self.pid.part())?;
        if self.pid.jedec() {
            writeln!(
                f,
                "    Designer          : {} (JEP106 CONT.:{:x}, ID:{:x})",
                self.pid.designer_name().unwrap_or("UNKNOWN"),
                self.pid.jep106_continuation(),
                self.pid.jep106_id()
            )?;
        }
        writeln!(f, "    Revision          : {:x}", self.pid.revision())?;
        writeln!(f, "    Manufacturer Rev. : {:x}", self.pid.revand())?;
        writeln!(f, "    Customer modified : {:x}", self.pid.cmod())?;
        writeln!(f, "    Size              : {}KB", self.pid.size_kb())?;
        writeln!(f, "  CID                 : {:#010x}", self.cid.0)?;
        writeln!(
            f,
            "    Class             : {}",
            self.class().map_or("UNKNOWN", |class| class.name())
        )?;
        write!(f, "  NAME                : {}", self.name())
    }
}

/// Stable reference to a component in a [`ComponentArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ComponentHandle(usize);

#[derive(Debug, Default)]
pub struct ComponentArena {
    components: Vec<Component>,
}

impl ComponentArena {
    pub fn insert(&mut self, component: Component) -> ComponentHandle {
        self.components.push(component);
        ComponentHandle(self.components.len() - 1)
    }

    pub fn get(&self, handle: ComponentHandle) -> &Component {
        &self.components[handle.0]
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

bitfield! {
    /// A raw ROM table entry.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct RomTableEntry(u32);
    impl Debug;
    pub u32, address_offset, _: 31, 12;
    pub u8, power_domain_id, _: 8, 4;
    pub power_domain_valid, _: 2;
    pub format, _: 1;
    pub present, _: 0;
}

impl RomTableEntry {
    /// The signed, page aligned offset added to the table base.
    fn offset(&self) -> u32 {
        self.0 & 0xFFFF_F000
    }

    /// Address of the component this entry points to, relative to a table at `base`.
    pub fn component_address(&self, base: u32) -> u32 {
        base.wrapping_add(self.offset())
    }

    /// Whether the entry points to a component. Only 32 bit format entries are valid.
    pub fn is_present(&self) -> bool {
        self.format() && self.present() && self.offset() != 0
    }
}

/// A ROM table and everything reachable through it.
#[derive(Debug)]
pub struct RomTable {
    pub component: ComponentHandle,
    /// Set when the MEMTYPE register reports system memory on the bus.
    pub sysmem: bool,
    /// Nested ROM tables.
    pub tables: Vec<(RomTableEntry, RomTable)>,
    /// Components which are not ROM tables.
    pub entries: Vec<(RomTableEntry, ComponentHandle)>,
}

impl RomTable {
    /// Walk the ROM table `component` refers to and all tables nested in it.
    pub fn parse(
        memory: &mut dyn MemoryInterface,
        arena: &mut ComponentArena,
        component: ComponentHandle,
    ) -> Result<Self, RomTableError> {
        let root = *arena.get(component);
        if !root.is_rom_table() {
            return Err(RomTableError::NotARomTable(root.base));
        }

        let mut visited = HashSet::from([(root.ap, root.base)]);
        Ok(Self::walk(memory, arena, component, 0, &mut visited))
    }

    fn walk(
        memory: &mut dyn MemoryInterface,
        arena: &mut ComponentArena,
        handle: ComponentHandle,
        depth: usize,
        visited: &mut HashSet<(u8, u32)>,
    ) -> Self {
        let Component { ap, base, .. } = *arena.get(handle);
        tracing::info!("ROM table at {:#010x} (AP {})", base, ap);

        let sysmem = match memory.read_word_32(base.wrapping_add(MEMTYPE)) {
            Ok(memtype) => memtype & 0x1 != 0,
            Err(error) => {
                tracing::warn!("Could not read MEMTYPE of ROM table at {:#010x}: {}", base, error);
                false
            }
        };
        tracing::debug!(
            "MEMTYPE: {}",
            if sysmem { "SYSMEM is present" } else { "SYSMEM is NOT present" }
        );

        let mut table = RomTable {
            component: handle,
            sysmem,
            tables: Vec::new(),
            entries: Vec::new(),
        };

        for offset in (0..ENTRY_AREA_SIZE).step_by(4) {
            let raw = match memory.read_word_32(base.wrapping_add(offset)) {
                Ok(raw) => raw,
                Err(error) => {
                    tracing::error!(
                        "Reading ROM table entry at {:#010x} failed: {}",
                        base.wrapping_add(offset),
                        error
                    );
                    break;
                }
            };
            if raw == 0 {
                break;
            }

            let entry = RomTableEntry(raw);
            let address = entry.component_address(base);
            tracing::debug!("Entry {:#010x} ({:#010x})", raw, address);
            if !entry.format() {
                tracing::debug!("Invalid entry");
                continue;
            }
            if entry.power_domain_valid() {
                tracing::debug!("Power domain ID: {:x}", entry.power_domain_id());
            }
            if !entry.is_present() {
                continue;
            }

            let child = match Component::read(memory, ap, address) {
                Ok(child) => child,
                Err(error) => {
                    tracing::warn!("Failed to read child component: {}", error);
                    continue;
                }
            };

            if child.is_rom_table() {
                if depth + 1 >= MAX_DEPTH {
                    tracing::warn!("Not following ROM table at {:#010x}: nested too deep", address);
                    continue;
                }
                if !visited.insert((ap, address)) {
                    tracing::warn!("ROM table at {:#010x} was already visited", address);
                    continue;
                }
                let child = arena.insert(child);
                let nested = Self::walk(memory, arena, child, depth + 1, visited);
                table.tables.push((entry, nested));
            } else {
                tracing::info!("Found {} at {:#010x}", child.name(), address);
                table.entries.push((entry, arena.insert(child)));
            }
        }

        table
    }

    /// Visit every component below this table, nested tables first.
    pub fn each(&self, f: &mut impl FnMut(ComponentHandle)) {
        for (_, table) in &self.tables {
            table.each(f);
        }
        for (_, component) in &self.entries {
            f(*component);
        }
    }

    fn description(&self, arena: &ComponentArena) -> RomTableDescription {
        RomTableDescription {
            component: arena.get(self.component).description(),
            sysmem: self.sysmem,
            tables: self
                .tables
                .iter()
                .map(|(entry, table)| EntryDescription {
                    entry: entry.0,
                    power_domain: entry.power_domain_valid().then(|| entry.power_domain_id()),
                    content: EntryContent::Table(table.description(arena)),
                })
                .collect(),
            components: self
                .entries
                .iter()
                .map(|(entry, component)| EntryDescription {
                    entry: entry.0,
                    power_domain: entry.power_domain_valid().then(|| entry.power_domain_id()),
                    content: EntryContent::Component(arena.get(*component).description()),
                })
                .collect(),
        }
    }
}

/// One access port together with what was discovered behind it.
#[derive(Debug)]
pub struct AccessPortTree {
    pub information: ApInformation,
    pub rom_table: Option<RomTable>,
    /// The port gives access to system memory.
    pub sysmem: bool,
}

/// Everything discovered on one debug port.
#[derive(Debug, Default)]
pub struct Topology {
    pub arena: ComponentArena,
    pub access_ports: Vec<AccessPortTree>,
}

impl Topology {
    /// Walk the ROM tables behind every memory access port in `access_ports`.
    #[tracing::instrument(skip_all)]
    pub fn discover(
        interface: &mut ArmCommunicationInterface<'_>,
        access_ports: Vec<ApInformation>,
    ) -> Self {
        let mut topology = Topology::default();
        for information in access_ports {
            let mut memory = interface.memory_ap(information.port);
            topology.add_access_port(&mut memory, information);
        }
        topology
    }

    /// Record one access port and walk the ROM table at its debug entry, if any.
    ///
    /// A failure while reading the table only drops that table.
    pub fn add_access_port(&mut self, memory: &mut dyn MemoryInterface, information: ApInformation) {
        let port = information.port;
        let mut tree = AccessPortTree {
            information,
            rom_table: None,
            sysmem: false,
        };

        match tree.information.debug_entry() {
            Some(base) => match Component::read(memory, port, base) {
                Ok(component) if component.is_rom_table() => {
                    let handle = self.arena.insert(component);
                    match RomTable::parse(memory, &mut self.arena, handle) {
                        Ok(table) => {
                            tree.sysmem = table.sysmem;
                            tree.rom_table = Some(table);
                        }
                        Err(error) => tracing::error!("{}", error),
                    }
                }
                Ok(component) => {
                    tracing::info!("ROM table was not found, {} at debug entry", component.name());
                    self.arena.insert(component);
                }
                Err(error) => tracing::error!("Failed to read ROM table: {}", error),
            },
            None if tree.information.is_ahb() => {
                tracing::info!("AP {} has no debug entry, using it as system memory", port);
                tree.sysmem = true;
            }
            None => {}
        }

        self.access_ports.push(tree);
    }

    pub fn component(&self, handle: ComponentHandle) -> &Component {
        self.arena.get(handle)
    }

    /// Every component reachable from a ROM table that matches `predicate`.
    pub fn find(&self, predicate: impl Fn(&Component) -> bool) -> Vec<ComponentHandle> {
        let mut found = Vec::new();
        for table in self.access_ports.iter().filter_map(|ap| ap.rom_table.as_ref()) {
            table.each(&mut |handle| {
                if predicate(self.arena.get(handle)) {
                    found.push(handle);
                }
            });
        }
        found
    }

    /// Ports which give access to system memory.
    pub fn sysmem_aps(&self) -> Vec<u8> {
        self.access_ports
            .iter()
            .filter(|ap| ap.sysmem)
            .map(|ap| ap.information.port)
            .collect()
    }

    pub fn memory_ap_count(&self) -> usize {
        self.access_ports
            .iter()
            .filter(|ap| ap.information.memory.is_some())
            .count()
    }

    pub fn description(&self) -> Vec<AccessPortDescription> {
        self.access_ports
            .iter()
            .map(|ap| {
                let idr = ap.information.idr;
                AccessPortDescription {
                    port: ap.information.port,
                    idr: idr.0,
                    kind: idr.kind_name(),
                    designer: idr.designer_name(),
                    variant: idr.variant(),
                    revision: idr.revision(),
                    base: ap.information.memory.map(|memory| memory.base.0),
                    debug_entry: ap.information.debug_entry(),
                    csw: ap.information.memory.map(|memory| memory.csw.to_string()),
                    sysmem: ap.sysmem,
                    rom_table: ap.rom_table.as_ref().map(|table| table.description(&self.arena)),
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentDescription {
    pub address: u32,
    pub name: &'static str,
    pub class: Option<&'static str>,
    pub designer: Option<&'static str>,
    pub part: u16,
    pub revision: u8,
    pub revand: u8,
    pub cmod: u8,
    pub size_kb: u32,
    pub pid: u64,
    pub cid: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryContent {
    Table(RomTableDescription),
    Component(ComponentDescription),
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryDescription {
    pub entry: u32,
    pub power_domain: Option<u8>,
    pub content: EntryContent,
}

#[derive(Debug, Clone, Serialize)]
pub struct RomTableDescription {
    pub component: ComponentDescription,
    pub sysmem: bool,
    pub tables: Vec<EntryDescription>,
    pub components: Vec<EntryDescription>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessPortDescription {
    pub port: u8,
    pub idr: u32,
    pub kind: &'static str,
    pub designer: Option<&'static str>,
    pub variant: u8,
    pub revision: u8,
    pub base: Option<u32>,
    pub debug_entry: Option<u32>,
    pub csw: Option<String>,
    pub sysmem: bool,
    pub rom_table: Option<RomTableDescription>,
}

#[cfg(test)]
mod test {
    use test_case::test_case;

    use super::*;
    use crate::architecture::arm::{
        ap::{Base, Csw, Idr, MemoryApInformation},
        memory::mock::MockMemoryAp,
    };

    const ROM_CID: u32 = 0xB105_100D;
    const GENERIC_IP_CID: u32 = 0xB105_E00D;
    const DEBUG_CID: u32 = 0xB105_900D;
    /// ARM designer, JEP106 continuation 4 and identity 0x3B.
    const ARM_PID: u64 = 0x04_000B_B000;

    const ROM_BASE: u32 = 0xE00F_F000;

    fn entry_reads(memory: &MockMemoryAp, base: u32) -> usize {
        memory
            .reads
            .iter()
            .filter(|address| (base..base + ENTRY_AREA_SIZE).contains(address))
            .count()
    }

    fn ahb_ap(base: u32) -> ApInformation {
        ApInformation {
            port: 0,
            idr: Idr(0x0477_0021),
            memory: Some(MemoryApInformation {
                base: Base(base),
                csw: Csw(0x2300_0052),
            }),
        }
    }

    /// Cortex-M0 style table with SCS, DWT and BPU.
    fn cortex_m0(memory: &mut MockMemoryAp) {
        memory.store_identification(ROM_BASE, ARM_PID | 0x4C4, ROM_CID);
        memory.store(
            ROM_BASE,
            &[
                0xFFF0_F003, // SCS at 0xE000E000
                0xFFF0_2003, // DWT at 0xE0001000
                0xFFF0_3003, // BPU at 0xE0002000
                0x0000_0000,
            ],
        );
        memory.store_identification(0xE000_E000, ARM_PID | part::SCS_M0 as u64, GENERIC_IP_CID);
        memory.store_identification(0xE000_1000, ARM_PID | part::DWT_M0 as u64, GENERIC_IP_CID);
        memory.store_identification(0xE000_2000, ARM_PID | part::BPU_M0 as u64, GENERIC_IP_CID);
    }

    #[test]
    fn identification_takes_nine_reads() {
        let mut memory = MockMemoryAp::new();
        memory.store_identification(0xE000_E000, ARM_PID | part::SCS_M0 as u64, GENERIC_IP_CID);

        let component = Component::read(&mut memory, 0, 0xE000_E000).unwrap();

        assert_eq!(memory.reads.len(), 9);
        assert!(component.cid.has_valid_preamble());
        assert_eq!(component.pid.part(), part::SCS_M0);
        assert!(component.pid.is_arm());
        assert_eq!(component.pid.designer_name(), Some("ARM Ltd"));
    }

    #[test]
    fn arm_generic_ip_part_zero_is_an_scs() {
        let component = Component {
            ap: 0,
            base: 0xE000_E000,
            pid: PeripheralId(ARM_PID),
            cid: ComponentId(GENERIC_IP_CID),
        };

        assert!(component.is_scs());
        assert!(!component.is_fpb());
        assert_eq!(component.name(), "Cortex-M3 SCS (System Control Space)");
    }

    #[test]
    fn scs_part_with_other_class_is_not_an_scs() {
        let component = Component {
            ap: 0,
            base: 0xE000_E000,
            pid: PeripheralId(ARM_PID),
            cid: ComponentId(DEBUG_CID),
        };

        assert!(!component.is_scs());
    }

    #[test]
    fn cortex_a9_debug_is_recognized() {
        let component = Component {
            ap: 1,
            base: 0x8011_0000,
            pid: PeripheralId(ARM_PID | part::DEBUG_A9 as u64),
            cid: ComponentId(DEBUG_CID),
        };

        assert!(component.is_armv7ar_debug());
        assert_eq!(component.name(), "Cortex-A9 Debug");
    }

    #[test]
    fn rom_table_class_always_recurses() {
        let mut memory = MockMemoryAp::new();
        // Nested table with a non ARM peripheral ID.
        memory.store_identification(ROM_BASE, ARM_PID, ROM_CID);
        memory.store(ROM_BASE, &[0x0000_1003]);
        memory.store_identification(ROM_BASE + 0x1000, 0x0000_0123, ROM_CID);
        memory.store(ROM_BASE + 0x1000, &[0xFF00_0003]);
        memory.store_identification(
            (ROM_BASE + 0x1000).wrapping_add(0xFF00_0000),
            ARM_PID,
            GENERIC_IP_CID,
        );

        let mut topology = Topology::default();
        topology.add_access_port(&mut memory, ahb_ap(ROM_BASE | 0x3));

        let table = topology.access_ports[0].rom_table.as_ref().unwrap();
        assert_eq!(table.tables.len(), 1);
        assert_eq!(table.tables[0].1.entries.len(), 1);
        assert_eq!(topology.find(Component::is_scs).len(), 1);
    }

    #[test]
    fn empty_entries_end_the_walk() {
        let mut memory = MockMemoryAp::new();
        memory.store_identification(ROM_BASE, ARM_PID, ROM_CID);
        // Three entries which are valid but not present, then the terminator.
        memory.store(ROM_BASE, &[0x0000_1002, 0x0000_2002, 0x0000_3002]);

        let mut topology = Topology::default();
        topology.add_access_port(&mut memory, ahb_ap(ROM_BASE | 0x3));

        assert_eq!(entry_reads(&memory, ROM_BASE), 4);
        assert_eq!(topology.arena.len(), 1);
        assert!(topology.find(|_| true).is_empty());
    }

    #[test]
    fn cortex_m0_components_are_found() {
        let mut memory = MockMemoryAp::new();
        cortex_m0(&mut memory);

        let mut topology = Topology::default();
        topology.add_access_port(&mut memory, ahb_ap(ROM_BASE | 0x3));

        let scs = topology.find(Component::is_scs);
        assert_eq!(scs.len(), 1);
        assert_eq!(topology.component(scs[0]).base, 0xE000_E000);
        assert_eq!(topology.find(Component::is_armv6m_dwt).len(), 1);
        assert_eq!(topology.find(Component::is_bpu).len(), 1);
        assert!(topology.sysmem_aps().is_empty());
    }

    #[test]
    fn unreadable_child_is_skipped() {
        let mut memory = MockMemoryAp::new();
        cortex_m0(&mut memory);
        memory.faulty.insert(0xE000_1FE0);

        let mut topology = Topology::default();
        topology.add_access_port(&mut memory, ahb_ap(ROM_BASE | 0x3));

        assert!(topology.find(Component::is_armv6m_dwt).is_empty());
        assert_eq!(topology.find(Component::is_bpu).len(), 1);
        assert_eq!(topology.find(Component::is_scs).len(), 1);
    }

    #[test]
    fn self_referencing_table_terminates() {
        let mut memory = MockMemoryAp::new();
        memory.store_identification(ROM_BASE, ARM_PID, ROM_CID);
        memory.store_identification(ROM_BASE + 0x1000, ARM_PID, ROM_CID);
        // The root points to a child which points back at the root.
        memory.store(ROM_BASE, &[0x0000_1003]);
        memory.store(ROM_BASE + 0x1000, &[0xFFFF_F003]);

        let mut topology = Topology::default();
        topology.add_access_port(&mut memory, ahb_ap(ROM_BASE | 0x3));

        let table = topology.access_ports[0].rom_table.as_ref().unwrap();
        assert_eq!(table.tables.len(), 1);
        assert!(table.tables[0].1.tables.is_empty());
    }

    #[test]
    fn nesting_stops_after_eight_tables() {
        let table_base = |level: u32| ROM_BASE + level * 0x1000;
        let mut memory = MockMemoryAp::new();
        // A chain of ten tables, each one pointing at the next.
        for level in 0..10 {
            memory.store_identification(table_base(level), ARM_PID, ROM_CID);
            memory.store(table_base(level), &[0x0000_1003]);
        }
        // The deepest followed table lists an SCS after the table it must not follow.
        memory.store(table_base(7), &[0x0000_1003, 0x0010_0003]);
        memory.store_identification(table_base(7) + 0x0010_0000, ARM_PID, GENERIC_IP_CID);

        let mut topology = Topology::default();
        topology.add_access_port(&mut memory, ahb_ap(ROM_BASE | 0x3));

        let mut table = topology.access_ports[0].rom_table.as_ref().unwrap();
        let mut levels = 1;
        while let Some((_, nested)) = table.tables.first() {
            table = nested;
            levels += 1;
        }
        assert_eq!(levels, MAX_DEPTH);
        assert_eq!(topology.component(table.component).base, table_base(7));
        assert_eq!(table.entries.len(), 1);
        assert_eq!(topology.find(Component::is_scs).len(), 1);
        assert_eq!(topology.arena.len(), MAX_DEPTH + 1);
    }

    #[test]
    fn ahb_ap_without_debug_entry_is_system_memory() {
        let mut memory = MockMemoryAp::new();

        let mut topology = Topology::default();
        topology.add_access_port(&mut memory, ahb_ap(0xFFFF_FFFF));

        assert_eq!(topology.sysmem_aps(), vec![0]);
        assert!(memory.reads.is_empty());
    }

    #[test]
    fn memtype_marks_system_memory() {
        let mut memory = MockMemoryAp::new();
        cortex_m0(&mut memory);
        memory.store(ROM_BASE + MEMTYPE, &[0x1]);

        let mut topology = Topology::default();
        topology.add_access_port(&mut memory, ahb_ap(ROM_BASE | 0x3));

        assert_eq!(topology.sysmem_aps(), vec![0]);
    }

    #[test]
    fn parse_rejects_other_components() {
        let mut memory = MockMemoryAp::new();
        let mut arena = ComponentArena::default();
        let handle = arena.insert(Component {
            ap: 0,
            base: 0xE000_E000,
            pid: PeripheralId(ARM_PID),
            cid: ComponentId(GENERIC_IP_CID),
        });

        let result = RomTable::parse(&mut memory, &mut arena, handle);

        assert!(matches!(result, Err(RomTableError::NotARomTable(0xE000_E000))));
    }

    #[test_case(0x0000_1003 => true; "present")]
    #[test_case(0x0000_1001 => false; "legacy format")]
    #[test_case(0x0000_1002 => false; "not present")]
    #[test_case(0x0000_0003 => false; "zero offset")]
    fn entry_presence(raw: u32) -> bool {
        RomTableEntry(raw).is_present()
    }

    #[test]
    fn negative_offsets_wrap() {
        assert_eq!(RomTableEntry(0xFFF0_F003).component_address(ROM_BASE), 0xE000_E000);
    }
}
