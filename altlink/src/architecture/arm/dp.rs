//! Debug port registers.

use std::fmt;

use bitfield::bitfield;

use super::Register;

/// A register of the debug port. All of them live in DP bank 0.
pub trait DpRegister: Register {}

bitfield! {
    /// ABORT, write only.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Abort(u32);
    impl Debug;
    pub _, set_orunerrclr: 4;
    pub _, set_wderrclr: 3;
    pub _, set_stkerrclr: 2;
    pub _, set_stkcmpclr: 1;
    pub _, set_dapabort: 0;
}

register!(Abort, 0x0, "ABORT");
impl DpRegister for Abort {}

impl Abort {
    /// Clear every sticky flag without aborting the current transaction.
    pub fn clear_sticky() -> Self {
        let mut abort = Abort(0);
        abort.set_stkcmpclr(true);
        abort.set_stkerrclr(true);
        abort.set_wderrclr(true);
        abort.set_orunerrclr(true);
        abort
    }
}

bitfield! {
    /// CTRL/STAT, the debug port control and status register.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Ctrl(u32);
    impl Debug;
    pub csyspwrupack, _: 31;
    pub csyspwrupreq, set_csyspwrupreq: 30;
    pub cdbgpwrupack, _: 29;
    pub cdbgpwrupreq, set_cdbgpwrupreq: 28;
    pub cdbgrstack, _: 27;
    pub cdbgrstreq, set_cdbgrstreq: 26;
    pub u16, trn_cnt, set_trn_cnt: 23, 12;
    pub u8, mask_lane, set_mask_lane: 11, 8;
    pub w_data_err, _: 7;
    pub read_ok, _: 6;
    pub sticky_err, set_sticky_err: 5;
    pub sticky_cmp, set_sticky_cmp: 4;
    pub u8, trn_mode, _: 3, 2;
    pub sticky_orun, set_sticky_orun: 1;
    pub orun_detect, set_orun_detect: 0;
}

register!(Ctrl, 0x4, "CTRL/STAT");
impl DpRegister for Ctrl {}

impl Ctrl {
    /// Any latched error that makes the following transactions untrustworthy.
    pub fn has_sticky_error(&self) -> bool {
        self.sticky_err() || self.sticky_cmp() || self.sticky_orun() || self.w_data_err()
    }
}

impl fmt::Display for Ctrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CTRL/STAT   : {:#010x}", self.0)?;
        writeln!(
            f,
            "  SYS PWR UP REQ: {} ACK: {}",
            u8::from(self.csyspwrupreq()),
            u8::from(self.csyspwrupack())
        )?;
        writeln!(
            f,
            "  DBG PWR UP REQ: {} ACK: {} RST REQ: {} RST ACK: {}",
            u8::from(self.cdbgpwrupreq()),
            u8::from(self.cdbgpwrupack()),
            u8::from(self.cdbgrstreq()),
            u8::from(self.cdbgrstack())
        )?;
        writeln!(
            f,
            "  TRNCNT: {:#06x} MASKLANE: {:#04x}",
            self.trn_cnt(),
            self.mask_lane()
        )?;
        writeln!(
            f,
            "  STICKYERR: {} STICKYCMP: {} STICKYORUN: {} TRNMODE: {} ORUNDETECT: {}",
            u8::from(self.sticky_err()),
            u8::from(self.sticky_cmp()),
            u8::from(self.sticky_orun()),
            self.trn_mode(),
            u8::from(self.orun_detect())
        )?;
        write!(
            f,
            "  (SWD) WDATAERR: {} READOK: {}",
            u8::from(self.w_data_err()),
            u8::from(self.read_ok())
        )
    }
}

bitfield! {
    /// SELECT, picks the AP and register banks for the following accesses.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Select(u32);
    impl Debug;
    pub u8, ap_sel, set_ap_sel: 31, 24;
    pub u8, ap_bank_sel, set_ap_bank_sel: 7, 4;
    pub u8, dp_bank_sel, set_dp_bank_sel: 3, 0;
}

register!(Select, 0x8, "SELECT");
impl DpRegister for Select {}

bitfield! {
    /// IDCODE (DPIDR), identifies the debug port.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct DpIdr(u32);
    impl Debug;
    pub u8, revision, _: 31, 28;
    pub u8, part_no, _: 27, 20;
    pub min, _: 16;
    pub u8, version, _: 15, 12;
    pub u16, designer, _: 11, 1;
    pub u8, jep_cc, _: 11, 8;
    pub u8, jep_id, _: 7, 1;
    pub rao, _: 0;
}

register!(DpIdr, 0x0, "IDCODE");
impl DpRegister for DpIdr {}

/// Designer field of ARM Ltd.
const ARM_DESIGNER: u16 = 0x23B;

impl DpIdr {
    /// A JTAG-DP reports part 0xBA with version and MINDP both zero.
    pub fn is_jtag_dp(&self) -> bool {
        self.part_no() == 0xBA && self.version() == 0 && !self.min()
    }

    pub fn part_name(&self) -> &'static str {
        match self.part_no() {
            0xBA if self.is_jtag_dp() => "JTAG-DP",
            0xBA => "SW-DP",
            0xBB => "SW-DP (M0)",
            0xBC => "SW-DP (M0+)",
            _ => "UNKNOWN",
        }
    }

    pub fn designer_name(&self) -> Option<&'static str> {
        if self.designer() == ARM_DESIGNER {
            return Some("ARM Ltd");
        }
        jep106::JEP106Code::new(self.jep_cc(), self.jep_id()).get()
    }
}

impl fmt::Display for DpIdr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "IDCODE      : {:#010x}", self.0)?;
        if !self.rao() {
            return write!(f, "  Invalid format");
        }
        writeln!(
            f,
            "  MANUFACTURER : {}",
            self.designer_name().unwrap_or("UNKNOWN")
        )?;
        writeln!(f, "  PARTNO       : {}", self.part_name())?;
        if self.is_jtag_dp() {
            write!(f, "  VERSION      : {:x}", self.revision())
        } else {
            writeln!(f, "  VERSION      : v{:x}", self.version())?;
            writeln!(
                f,
                "  MIN          : {}",
                if self.min() { "MINDP" } else { "No" }
            )?;
            write!(f, "  REVISION     : {:x}", self.revision())
        }
    }
}
