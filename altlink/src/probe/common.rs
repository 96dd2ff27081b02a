//! JTAG scan chain decoding shared by the scan routine and the device layer.

use bitfield::bitfield;
use bitvec::prelude::*;
use serde::Serialize;

bitfield! {
    /// A JTAG IDCODE.
    /// Identifies a particular Test Access Port (TAP) on the JTAG scan chain.
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct IdCode(u32);
    impl Debug;

    u8;
    /// The IDCODE version.
    pub version, _: 31, 28;

    u16;
    /// The part number.
    pub part_number, _: 27, 12;

    /// The JEDEC JEP-106 Manufacturer ID, continuation code and identity code together.
    pub manufacturer, _: 11, 1;

    u8;
    /// The continuation code of the JEDEC JEP-106 Manufacturer ID.
    pub manufacturer_continuation, _: 11, 8;

    /// The identity code of the JEDEC JEP-106 Manufacturer ID.
    pub manufacturer_identity, _: 7, 1;

    bool;
    /// Always set in a real IDCODE.
    pub lsbit, _: 0;
}

/// Designer code of ARM Ltd. in IDCODE layout.
const ARM_DESIGNER: u16 = 0x23B;
/// Designer code used by early ARM JTAG-DPs.
const ARM_LEGACY_DESIGNER: u16 = 0x787;
/// IR length of an ARM JTAG-DP.
pub(crate) const ARM_DP_IR_LEN: usize = 4;

impl std::fmt::Display for IdCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(mfn) = self.manufacturer_name() {
            write!(f, "0x{:08X} ({})", self.0, mfn)
        } else {
            write!(f, "0x{:08X}", self.0)
        }
    }
}

impl Serialize for IdCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.0)
    }
}

impl IdCode {
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// Returns `true` iff the IDCODE's least significant bit is `1`
    /// and the 7-bit `manufacturer_identity` is set to one of the non-reserved values in the range `[1,126]`.
    pub fn valid(&self) -> bool {
        self.lsbit() && self.manufacturer_identity() != 0 && self.manufacturer_identity() != 127
    }

    pub fn manufacturer_name(&self) -> Option<&'static str> {
        let cc = self.manufacturer_continuation();
        let id = self.manufacturer_identity();
        jep106::JEP106Code::new(cc, id).get()
    }

    /// Whether this TAP is an ARM JTAG-DP, whose IR is known to be 4 bits long.
    pub fn is_arm_debug_port(&self) -> bool {
        matches!(self.manufacturer(), ARM_DESIGNER | ARM_LEGACY_DESIGNER)
    }
}

/// One TAP found on the scan chain, nearest to TDO first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JtagDevice {
    /// `None` for TAPs that come out of reset with BYPASS selected.
    pub idcode: Option<IdCode>,
    pub ir_len: usize,
}

impl JtagDevice {
    pub fn is_arm_debug_port(&self) -> bool {
        self.idcode.is_some_and(|id| id.is_arm_debug_port())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScanChainError {
    #[error("Invalid IDCODE")]
    InvalidIdCode,
    #[error("Invalid IR scan chain")]
    InvalidIR,
}

/// Decode the data registers captured right after a TAP reset.
///
/// A TAP with an IDCODE register shifts out 32 bits starting with a `1`, a TAP in
/// BYPASS a single `0`, so the capture can be split unambiguously.
pub(crate) fn extract_idcodes(
    mut dr: &BitSlice<u8>,
    n_taps: usize,
) -> Result<Vec<Option<IdCode>>, ScanChainError> {
    let mut idcodes = Vec::with_capacity(n_taps);

    while idcodes.len() < n_taps {
        match dr.first().map(|bit| *bit) {
            Some(true) => {
                if dr.len() < 32 {
                    tracing::error!("Truncated IDCODE: {dr:02X?}");
                    return Err(ScanChainError::InvalidIdCode);
                }

                let idcode = IdCode(dr[0..32].load_le::<u32>());
                if !idcode.valid() {
                    tracing::error!("Invalid IDCODE: {:08X}", idcode.0);
                    return Err(ScanChainError::InvalidIdCode);
                }
                tracing::info!("Found IDCODE: {idcode}");
                idcodes.push(Some(idcode));
                dr = &dr[32..];
            }
            Some(false) => {
                tracing::info!("Found bypass TAP");
                idcodes.push(None);
                dr = &dr[1..];
            }
            None => return Err(ScanChainError::InvalidIdCode),
        }
    }

    Ok(idcodes)
}

/// Split the IR capture `ir` of the whole chain into one length per TAP.
///
/// Every IR captures `0b..01`, so each TAP starts at a `1` followed by a `0`. The same
/// pattern may also occur inside an IR, so ARM JTAG-DPs get their known length and the
/// remaining TAPs must be placed unambiguously.
pub(crate) fn extract_ir_lengths(
    ir: &BitSlice<u8>,
    idcodes: &[Option<IdCode>],
) -> Result<Vec<usize>, ScanChainError> {
    let starts = ir
        .windows(2)
        .enumerate()
        .filter(|(_, w)| w[0] && !w[1])
        .map(|(i, _)| i)
        .collect::<Vec<usize>>();
    tracing::trace!("Possible IR start positions: {starts:?}");

    let n_taps = idcodes.len();
    if n_taps == 0 {
        tracing::error!("Cannot scan IR without at least one TAP");
        return Err(ScanChainError::InvalidIR);
    }
    if starts.len() < n_taps || starts[0] != 0 {
        tracing::error!("IR chain does not hold {n_taps} valid start patterns");
        return Err(ScanChainError::InvalidIR);
    }

    if n_taps == starts.len() {
        let mut lengths: Vec<usize> = starts.windows(2).map(|w| w[1] - w[0]).collect();
        lengths.push(ir.len() - starts[n_taps - 1]);
        tracing::info!("IR lengths are unambiguous: {lengths:?}");
        return Ok(lengths);
    }

    let mut lengths = Vec::with_capacity(n_taps);
    let mut position = 0;
    for (index, idcode) in idcodes.iter().enumerate() {
        if !starts.contains(&position) {
            tracing::error!("TAP {index} does not start on a valid IR pattern");
            return Err(ScanChainError::InvalidIR);
        }

        let length = if index == n_taps - 1 {
            ir.len() - position
        } else if idcode.is_some_and(|id| id.is_arm_debug_port()) {
            ARM_DP_IR_LEN
        } else {
            tracing::error!("IR lengths are ambiguous at TAP {index}");
            return Err(ScanChainError::InvalidIR);
        };
        lengths.push(length);
        position += length;
    }

    if position != ir.len() {
        return Err(ScanChainError::InvalidIR);
    }
    tracing::info!("IR lengths: {lengths:?}");
    Ok(lengths)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const ARM_TAP: IdCode = IdCode(0x4BA00477);
    const STM_BS_TAP: IdCode = IdCode(0x06433041);

    #[test]
    fn id_code_display() {
        assert_eq!(ARM_TAP.to_string(), "0x4BA00477 (ARM Ltd)");
        assert_eq!(STM_BS_TAP.to_string(), "0x06433041 (STMicroelectronics)");
    }

    #[test]
    fn arm_debug_port_is_recognized() {
        assert!(ARM_TAP.is_arm_debug_port());
        assert!(!STM_BS_TAP.is_arm_debug_port());
        assert_eq!(ARM_TAP.part_number(), 0xBA00);
    }

    #[test]
    fn ir_lengths_with_one_tap() {
        let ir = bitvec![u8, Lsb0; 1, 0, 0, 0];

        assert_eq!(extract_ir_lengths(&ir, &[Some(ARM_TAP)]).unwrap(), vec![4]);
    }

    #[test]
    fn ir_lengths_with_two_taps() {
        // Cortex-M TAP next to a 5 bit boundary scan TAP, as found on STM32F1/F4.
        let ir = bitvec![u8, Lsb0; 1, 0, 0, 0, 1, 0, 0, 0, 0];

        let lengths = extract_ir_lengths(&ir, &[Some(ARM_TAP), Some(STM_BS_TAP)]).unwrap();

        assert_eq!(lengths, vec![4, 5]);
    }

    #[test]
    fn known_dp_length_resolves_ambiguity() {
        // The boundary scan IR captures 0b01001, which holds a second start pattern.
        let ir = bitvec![u8, Lsb0; 1, 0, 0, 0, 1, 0, 0, 1, 0];

        let lengths = extract_ir_lengths(&ir, &[Some(ARM_TAP), Some(STM_BS_TAP)]).unwrap();

        assert_eq!(lengths, vec![4, 5]);
    }

    #[test]
    fn ambiguous_unknown_taps_fail() {
        let ir = bitvec![u8, Lsb0; 1, 0, 0, 1, 0, 1, 0, 0, 0];

        assert!(extract_ir_lengths(&ir, &[Some(STM_BS_TAP), None]).is_err());
    }

    #[test]
    fn id_codes_with_bypass_tap() {
        let mut dr = bitvec![u8, Lsb0; 0; 65];
        dr[0..32].store_le(ARM_TAP.0);
        dr.set(32, false);
        dr[33..65].store_le(STM_BS_TAP.0);

        let idcodes = extract_idcodes(&dr, 3).unwrap();

        assert_eq!(idcodes, vec![Some(ARM_TAP), None, Some(STM_BS_TAP)]);
    }

    #[test]
    fn truncated_id_code_fails() {
        let mut dr = bitvec![u8, Lsb0; 0; 40];
        dr[0..32].store_le(ARM_TAP.0);
        dr.set(32, true);

        assert!(extract_idcodes(&dr, 2).is_err());
    }
}
