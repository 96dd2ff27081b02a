//! A32 instructions the debugger feeds through DBGITR.

/// MCR p14, 0, `rt`, c0, c5, 0: move `rt` into DBGDTRTX.
pub(crate) fn build_mcr_dtrtx(rt: u16) -> u32 {
    build_mcr(14, 0, rt, 0, 5, 0)
}

/// MRC p14, 0, `rt`, c0, c5, 0: move DBGDTRRX into `rt`.
pub(crate) fn build_mrc_dtrrx(rt: u16) -> u32 {
    build_mrc(14, 0, rt, 0, 5, 0)
}

pub(crate) fn build_mcr(
    coproc: u8,
    opcode1: u8,
    reg: u16,
    ctrl_reg_n: u8,
    ctrl_reg_m: u8,
    opcode2: u8,
) -> u32 {
    let mut ret = 0b1110_1110_0000_0000_0000_0000_0001_0000;

    ret |= (coproc as u32) << 8;
    ret |= (opcode1 as u32) << 21;
    ret |= (reg as u32) << 12;
    ret |= (ctrl_reg_n as u32) << 16;
    ret |= ctrl_reg_m as u32;
    ret |= (opcode2 as u32) << 5;

    ret
}

pub(crate) fn build_mrc(
    coproc: u8,
    opcode1: u8,
    reg: u16,
    ctrl_reg_n: u8,
    ctrl_reg_m: u8,
    opcode2: u8,
) -> u32 {
    build_mcr(coproc, opcode1, reg, ctrl_reg_n, ctrl_reg_m, opcode2) | (1 << 20)
}

/// MOV `rd`, `rm`
pub(crate) fn build_mov(rd: u16, rm: u16) -> u32 {
    0b1110_0001_1010_0000_0000_0000_0000_0000 | (rd as u32) << 12 | rm as u32
}

/// MRS `rd`, CPSR
pub(crate) fn build_mrs(rd: u16) -> u32 {
    0b1110_0001_0000_1111_0000_0000_0000_0000 | (rd as u32) << 12
}
