//! Types and functions for interacting with target memory.

#[cfg(test)]
pub(crate) mod mock;
pub mod romtable;

use super::{
    ap::{Csw, DataSize, BD0, DRW, TAR},
    communication_interface::ArmCommunicationInterface,
    ArmError,
};

/// Word, half-word and byte access to a target address space.
///
/// Debug units only ever see this trait, so they work the same on a real memory access
/// port and on the mocks used in tests.
pub trait MemoryInterface {
    /// Read a 32bit word at `address`, which must be a multiple of 4.
    fn read_word_32(&mut self, address: u32) -> Result<u32, ArmError>;

    /// Read a 16bit word at `address`, which must be a multiple of 2.
    fn read_word_16(&mut self, address: u32) -> Result<u16, ArmError>;

    fn read_word_8(&mut self, address: u32) -> Result<u8, ArmError>;

    /// Write a 32bit word at `address`, which must be a multiple of 4.
    fn write_word_32(&mut self, address: u32, data: u32) -> Result<(), ArmError>;

    /// Write a 16bit word at `address`, which must be a multiple of 2.
    fn write_word_16(&mut self, address: u32, data: u16) -> Result<(), ArmError>;

    fn write_word_8(&mut self, address: u32, data: u8) -> Result<(), ArmError>;

    /// Read `data.len()` bytes starting at any `address`.
    ///
    /// The range is covered with the widest aligned accesses possible.
    fn read_8(&mut self, address: u32, data: &mut [u8]) -> Result<(), ArmError> {
        let mut offset = 0;
        while offset < data.len() {
            let address = address.wrapping_add(offset as u32);
            let remaining = data.len() - offset;
            if address % 4 == 0 && remaining >= 4 {
                let word = self.read_word_32(address)?;
                data[offset..offset + 4].copy_from_slice(&word.to_le_bytes());
                offset += 4;
            } else if address % 2 == 0 && remaining >= 2 {
                let half = self.read_word_16(address)?;
                data[offset..offset + 2].copy_from_slice(&half.to_le_bytes());
                offset += 2;
            } else {
                data[offset] = self.read_word_8(address)?;
                offset += 1;
            }
        }
        Ok(())
    }

    /// Write `data` starting at any `address`.
    fn write_8(&mut self, address: u32, data: &[u8]) -> Result<(), ArmError> {
        let mut offset = 0;
        while offset < data.len() {
            let address = address.wrapping_add(offset as u32);
            let remaining = data.len() - offset;
            if address % 4 == 0 && remaining >= 4 {
                let mut word = [0u8; 4];
                word.copy_from_slice(&data[offset..offset + 4]);
                self.write_word_32(address, u32::from_le_bytes(word))?;
                offset += 4;
            } else if address % 2 == 0 && remaining >= 2 {
                let half = u16::from_le_bytes([data[offset], data[offset + 1]]);
                self.write_word_16(address, half)?;
                offset += 2;
            } else {
                self.write_word_8(address, data[offset])?;
                offset += 1;
            }
        }
        Ok(())
    }
}

impl<T: MemoryInterface + ?Sized> MemoryInterface for &mut T {
    fn read_word_32(&mut self, address: u32) -> Result<u32, ArmError> {
        (**self).read_word_32(address)
    }

    fn read_word_16(&mut self, address: u32) -> Result<u16, ArmError> {
        (**self).read_word_16(address)
    }

    fn read_word_8(&mut self, address: u32) -> Result<u8, ArmError> {
        (**self).read_word_8(address)
    }

    fn write_word_32(&mut self, address: u32, data: u32) -> Result<(), ArmError> {
        (**self).write_word_32(address, data)
    }

    fn write_word_16(&mut self, address: u32, data: u16) -> Result<(), ArmError> {
        (**self).write_word_16(address, data)
    }

    fn write_word_8(&mut self, address: u32, data: u8) -> Result<(), ArmError> {
        (**self).write_word_8(address, data)
    }
}

fn check_alignment(address: u32, alignment: usize) -> Result<(), ArmError> {
    if address as usize % alignment != 0 {
        return Err(ArmError::AlignmentError { address, alignment });
    }
    Ok(())
}

/// Bit offset of the byte lane `address` uses on the 32 bit data bus.
fn lane_shift(address: u32) -> u32 {
    (address & 0x3) * 8
}

/// Memory behind one memory access port.
///
/// CSW and TAR values are cached in the interface state, so consecutive accesses only
/// write them when they change. Word accesses within the 16 byte window of the current
/// TAR use the banked data registers and leave TAR alone.
pub struct ApMemory<'iface, 'probe> {
    interface: &'iface mut ArmCommunicationInterface<'probe>,
    ap: u8,
}

impl<'iface, 'probe> ApMemory<'iface, 'probe> {
    pub(crate) fn new(interface: &'iface mut ArmCommunicationInterface<'probe>, ap: u8) -> Self {
        Self { interface, ap }
    }

    pub fn ap(&self) -> u8 {
        self.ap
    }

    fn set_size(&mut self, size: DataSize) -> Result<(), ArmError> {
        let csw = match self.interface.mem_ap_state(self.ap).csw {
            Some(csw) => csw,
            None => {
                let csw: Csw = self.interface.read_ap_register(self.ap)?;
                self.interface.mem_ap_state(self.ap).csw = Some(csw);
                csw
            }
        };

        let wanted = csw.with_size(size);
        if wanted != csw {
            self.interface.mem_ap_state(self.ap).csw = None;
            self.interface.write_ap_register(self.ap, wanted)?;
            self.interface.mem_ap_state(self.ap).csw = Some(wanted);
        }
        Ok(())
    }

    fn set_tar(&mut self, address: u32) -> Result<(), ArmError> {
        if self.interface.mem_ap_state(self.ap).tar == Some(address) {
            return Ok(());
        }

        self.interface.mem_ap_state(self.ap).tar = None;
        self.interface.write_raw_ap_register(self.ap, TAR, address)?;
        self.interface.mem_ap_state(self.ap).tar = Some(address);
        Ok(())
    }

    /// The data register to use for a word access at `address`, programming TAR if needed.
    fn word_register(&mut self, address: u32) -> Result<u8, ArmError> {
        match self.interface.mem_ap_state(self.ap).tar {
            Some(tar) if tar == address => Ok(DRW),
            Some(tar) if tar & !0xF == address & !0xF => Ok(BD0 + (address & 0xC) as u8),
            _ => {
                self.set_tar(address)?;
                Ok(DRW)
            }
        }
    }
}

impl MemoryInterface for ApMemory<'_, '_> {
    fn read_word_32(&mut self, address: u32) -> Result<u32, ArmError> {
        check_alignment(address, 4)?;
        self.set_size(DataSize::U32)?;
        let register = self.word_register(address)?;
        self.interface.read_raw_ap_register(self.ap, register)
    }

    fn read_word_16(&mut self, address: u32) -> Result<u16, ArmError> {
        check_alignment(address, 2)?;
        self.set_size(DataSize::U16)?;
        self.set_tar(address)?;
        let value = self.interface.read_raw_ap_register(self.ap, DRW)?;
        Ok((value >> lane_shift(address)) as u16)
    }

    fn read_word_8(&mut self, address: u32) -> Result<u8, ArmError> {
        self.set_size(DataSize::U8)?;
        self.set_tar(address)?;
        let value = self.interface.read_raw_ap_register(self.ap, DRW)?;
        Ok((value >> lane_shift(address)) as u8)
    }

    fn write_word_32(&mut self, address: u32, data: u32) -> Result<(), ArmError> {
        check_alignment(address, 4)?;
        self.set_size(DataSize::U32)?;
        let register = self.word_register(address)?;
        self.interface.write_raw_ap_register(self.ap, register, data)
    }

    fn write_word_16(&mut self, address: u32, data: u16) -> Result<(), ArmError> {
        check_alignment(address, 2)?;
        self.set_size(DataSize::U16)?;
        self.set_tar(address)?;
        self.interface
            .write_raw_ap_register(self.ap, DRW, u32::from(data) << lane_shift(address))
    }

    fn write_word_8(&mut self, address: u32, data: u8) -> Result<(), ArmError> {
        self.set_size(DataSize::U8)?;
        self.set_tar(address)?;
        self.interface
            .write_raw_ap_register(self.ap, DRW, u32::from(data) << lane_shift(address))
    }
}
