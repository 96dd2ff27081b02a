use std::collections::{HashMap, HashSet};

use super::MemoryInterface;
use crate::architecture::arm::{ArmError, DapError};

/// Word addressed memory recording every access.
#[derive(Debug, Default)]
pub(crate) struct MockMemoryAp {
    pub memory: HashMap<u32, u32>,
    /// Addresses of all reads, in order.
    pub reads: Vec<u32>,
    /// Address and value of all writes, in order.
    pub writes: Vec<(u32, u32)>,
    /// Words whose accesses answer with a FAULT.
    pub faulty: HashSet<u32>,
}

impl MockMemoryAp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place consecutive words starting at `address`.
    pub fn store(&mut self, address: u32, words: &[u32]) {
        for (i, word) in words.iter().enumerate() {
            self.memory.insert(address + 4 * i as u32, *word);
        }
    }

    /// Place an 8 byte peripheral ID and a 4 byte component ID in the last words of the 4 KB
    /// block at `base`, one byte per register.
    pub fn store_identification(&mut self, base: u32, pid: u64, cid: u32) {
        let pid = pid.to_le_bytes();
        for (i, byte) in pid[..4].iter().enumerate() {
            self.memory.insert(base + 0xFE0 + 4 * i as u32, u32::from(*byte));
        }
        for (i, byte) in pid[4..].iter().enumerate() {
            self.memory.insert(base + 0xFD0 + 4 * i as u32, u32::from(*byte));
        }
        for (i, byte) in cid.to_le_bytes().iter().enumerate() {
            self.memory.insert(base + 0xFF0 + 4 * i as u32, u32::from(*byte));
        }
    }

    pub fn word(&self, address: u32) -> u32 {
        self.memory.get(&address).copied().unwrap_or(0)
    }

    fn check(&self, address: u32) -> Result<(), ArmError> {
        if self.faulty.contains(&(address & !0x3)) {
            return Err(DapError::FaultResponse.into());
        }
        Ok(())
    }

    fn read(&mut self, address: u32) -> Result<u32, ArmError> {
        self.reads.push(address);
        self.check(address)?;
        Ok(self.word(address & !0x3))
    }

    fn write(&mut self, address: u32, value: u32, mask: u32) -> Result<(), ArmError> {
        self.writes.push((address, value));
        self.check(address)?;
        let shift = (address & 0x3) * 8;
        let word = self.word(address & !0x3);
        self.memory
            .insert(address & !0x3, (word & !(mask << shift)) | ((value & mask) << shift));
        Ok(())
    }
}

impl MemoryInterface for MockMemoryAp {
    fn read_word_32(&mut self, address: u32) -> Result<u32, ArmError> {
        self.read(address)
    }

    fn read_word_16(&mut self, address: u32) -> Result<u16, ArmError> {
        Ok((self.read(address)? >> ((address & 0x2) * 8)) as u16)
    }

    fn read_word_8(&mut self, address: u32) -> Result<u8, ArmError> {
        Ok((self.read(address)? >> ((address & 0x3) * 8)) as u8)
    }

    fn write_word_32(&mut self, address: u32, data: u32) -> Result<(), ArmError> {
        self.write(address, data, 0xFFFF_FFFF)
    }

    fn write_word_16(&mut self, address: u32, data: u16) -> Result<(), ArmError> {
        self.write(address, u32::from(data), 0xFFFF)
    }

    fn write_word_8(&mut self, address: u32, data: u8) -> Result<(), ArmError> {
        self.write(address, u32::from(data), 0xFF)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn unaligned_block_is_split_into_aligned_accesses() {
        let mut memory = MockMemoryAp::new();
        memory.store(0x2000_0000, &[0x4433_2211, 0x8877_6655, 0xCCBB_AA99]);

        let mut data = [0u8; 9];
        memory.read_8(0x2000_0001, &mut data).unwrap();

        assert_eq!(data, [0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA]);
        // A byte, a half word, a word and a half word.
        assert_eq!(
            memory.reads,
            vec![0x2000_0001, 0x2000_0002, 0x2000_0004, 0x2000_0008]
        );
    }

    #[test]
    fn block_write_keeps_neighbouring_bytes() {
        let mut memory = MockMemoryAp::new();
        memory.store(0x2000_0000, &[0xFFFF_FFFF, 0xFFFF_FFFF]);

        memory.write_8(0x2000_0003, &[0x01, 0x02, 0x03]).unwrap();

        assert_eq!(memory.word(0x2000_0000), 0x01FF_FFFF);
        assert_eq!(memory.word(0x2000_0004), 0xFFFF_0302);
    }
}
