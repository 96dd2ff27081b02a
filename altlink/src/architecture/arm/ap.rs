//! Access port registers and the information gathered while scanning them.

use std::fmt;

use bitfield::bitfield;
use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;

use super::Register;

/// A register of an access port. `ADDRESS` carries the bank in its upper nibble.
pub trait ApRegister: Register {}

/// TAR, the transfer address register.
pub const TAR: u8 = 0x04;
/// DRW, the data read/write register.
pub const DRW: u8 = 0x0C;
/// BD0, the first of the four banked data registers. BDn accesses `TAR[31:4] + 4 * n`.
pub const BD0: u8 = 0x10;

/// The class of an access port.
#[derive(Primitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApClass {
    Undefined = 0x0,
    MemAp = 0x8,
}

/// The bus behind an access port.
#[derive(Primitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApType {
    JtagConnection = 0x0,
    AmbaAhb = 0x1,
    AmbaApb = 0x2,
    AmbaAxi = 0x4,
}

bitfield! {
    /// IDR, the identification register of every access port.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Idr(u32);
    impl Debug;
    pub u8, revision, _: 31, 28;
    pub u8, continuation, _: 27, 24;
    pub u8, identity, _: 23, 17;
    pub u8, class_raw, _: 16, 13;
    pub u8, variant, _: 7, 4;
    pub u8, type_raw, _: 3, 0;
}

register!(Idr, 0xFC, "IDR");
impl ApRegister for Idr {}

impl Idr {
    pub fn class(&self) -> Option<ApClass> {
        ApClass::from_u8(self.class_raw())
    }

    pub fn ap_type(&self) -> Option<ApType> {
        ApType::from_u8(self.type_raw())
    }

    pub fn is_memory_ap(&self) -> bool {
        self.class() == Some(ApClass::MemAp)
    }

    pub fn is_ahb(&self) -> bool {
        self.is_memory_ap() && self.ap_type() == Some(ApType::AmbaAhb)
    }

    pub fn is_arm(&self) -> bool {
        self.continuation() == 0x4 && self.identity() == 0x3B
    }

    pub fn designer_name(&self) -> Option<&'static str> {
        jep106::JEP106Code::new(self.continuation(), self.identity()).get()
    }

    /// Name of the class and bus, e.g. `MEM-AP AMBA AHB bus`.
    pub fn kind_name(&self) -> &'static str {
        match (self.class(), self.ap_type()) {
            (Some(ApClass::Undefined), Some(ApType::JtagConnection)) => "JTAG-AP",
            (Some(ApClass::MemAp), Some(ApType::AmbaAhb)) => "MEM-AP AMBA AHB bus",
            (Some(ApClass::MemAp), Some(ApType::AmbaApb)) => "MEM-AP AMBA APB2 or APB3 bus",
            (Some(ApClass::MemAp), Some(ApType::AmbaAxi)) => "MEM-AP AMBA AXI3 or AXI4 bus",
            _ => "UNKNOWN",
        }
    }
}

/// Transfer size programmed into CSW.
#[derive(Primitive, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataSize {
    U8 = 0b000,
    U16 = 0b001,
    #[default]
    U32 = 0b010,
    U64 = 0b011,
    U128 = 0b100,
    U256 = 0b101,
}

impl DataSize {
    pub fn byte_count(self) -> usize {
        1 << self as usize
    }
}

bitfield! {
    /// CSW, the control/status word of a memory access port.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Csw(u32);
    impl Debug;
    pub dbg_sw_enable, set_dbg_sw_enable: 31;
    pub sprot, set_sprot: 30;
    /// HPROT bit selecting the debug bus master on AHB-AP.
    pub master_debug, set_master_debug: 29;
    pub u8, prot, set_prot: 28, 24;
    /// Privileged access on AHB-AP.
    pub hprot1, set_hprot1: 25;
    pub spiden, _: 23;
    pub u8, ty, set_ty: 15, 12;
    pub u8, mode, set_mode: 11, 8;
    pub tr_in_prog, _: 7;
    pub device_en, _: 6;
    pub u8, addr_inc, set_addr_inc: 5, 4;
    pub u8, size_raw, set_size_raw: 2, 0;
}

register!(Csw, 0x00, "CSW");
impl ApRegister for Csw {}

impl Csw {
    pub fn size(&self) -> Option<DataSize> {
        DataSize::from_u8(self.size_raw())
    }

    /// The same word with another transfer size and auto-increment turned off.
    pub fn with_size(mut self, size: DataSize) -> Self {
        self.set_size_raw(size as u8);
        self.set_addr_inc(0);
        self
    }
}

impl fmt::Display for Csw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Control/Status    : {:#010x}", self.0)?;
        writeln!(
            f,
            "  Device          : {}",
            if self.device_en() { "enabled" } else { "disabled" }
        )?;
        if self.device_en() {
            writeln!(
                f,
                "  Debug SW Access : {}",
                if self.dbg_sw_enable() { "enabled" } else { "disabled" }
            )?;
        }
        writeln!(
            f,
            "  Secure Access   : {}",
            if self.spiden() { "enabled" } else { "disabled" }
        )?;
        writeln!(
            f,
            "  SProt/Prot/Type : {:x}/{:x}/{:x}",
            u8::from(self.sprot()),
            self.prot(),
            self.ty()
        )?;
        writeln!(
            f,
            "  Mode            : {}",
            match self.mode() {
                0 => "Basic",
                1 => "Barrier support enabled",
                _ => "UNKNOWN",
            }
        )?;
        writeln!(
            f,
            "  Transfer        : {}",
            if self.tr_in_prog() { "in progress" } else { "idle" }
        )?;
        writeln!(
            f,
            "  Auto increment  : {}",
            match self.addr_inc() {
                0 => "off",
                1 => "single",
                2 => "packed",
                _ => "UNKNOWN",
            }
        )?;
        write!(
            f,
            "  Size            : {}",
            match self.size() {
                Some(size) => format!("{}bit", size.byte_count() * 8),
                None => "UNKNOWN".to_owned(),
            }
        )
    }
}

bitfield! {
    /// BASE, points at the debug component or ROM table behind a memory access port.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Base(u32);
    impl Debug;
    pub u32, base_address, _: 31, 12;
    pub format, _: 1;
    pub present, _: 0;
}

register!(Base, 0xF8, "BASE");
impl ApRegister for Base {}

impl Base {
    /// The page aligned address of the debug entry, if there is one.
    ///
    /// The legacy format signals "no entry" with all ones, the current format with
    /// the present bit cleared.
    pub fn debug_entry(&self) -> Option<u32> {
        if self.0 == 0xFFFF_FFFF || (self.format() && !self.present()) {
            None
        } else {
            Some(self.0 & 0xFFFF_F000)
        }
    }
}

/// What the AP scan learned about one access port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApInformation {
    pub port: u8,
    pub idr: Idr,
    /// BASE and CSW, only read for memory access ports.
    pub memory: Option<MemoryApInformation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryApInformation {
    pub base: Base,
    pub csw: Csw,
}

impl ApInformation {
    pub fn is_ahb(&self) -> bool {
        self.idr.is_ahb()
    }

    pub fn debug_entry(&self) -> Option<u32> {
        self.memory.and_then(|m| m.base.debug_entry())
    }
}

impl fmt::Display for ApInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "AP-{}", self.port)?;
        writeln!(f, "  IDR: {:#010x}", self.idr.0)?;
        writeln!(
            f,
            "    Designer   : {}",
            self.idr.designer_name().unwrap_or("UNKNOWN")
        )?;
        writeln!(f, "    Class/Type : {}", self.idr.kind_name())?;
        writeln!(f, "    Variant    : {:x}", self.idr.variant())?;
        write!(f, "    Revision   : {:x}", self.idr.revision())?;
        if let Some(memory) = &self.memory {
            writeln!(f)?;
            writeln!(f, "  BASE : {:#010x}", memory.base.0 & 0xFFFF_F000)?;
            writeln!(
                f,
                "    Debug entry : {}",
                if memory.base.debug_entry().is_some() {
                    "present"
                } else {
                    "no"
                }
            )?;
            for line in memory.csw.to_string().lines() {
                write!(f, "\n  {line}")?;
            }
        }
        Ok(())
    }
}
