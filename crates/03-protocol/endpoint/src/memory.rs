//! Byte-addressed backing store served to the peer.

use std::collections::HashMap;

/// Sparse memory; bytes never written read back as zero.
#[derive(Debug, Default)]
pub struct SparseMemory {
    bytes: HashMap<u64, u8>,
}

impl SparseMemory {
    pub fn read(&self, address: u64, len: usize) -> Vec<u8> {
        (0..len as u64)
            .map(|offset| {
                self.bytes
                    .get(&address.wrapping_add(offset))
                    .copied()
                    .unwrap_or(0)
            })
            .collect()
    }

    pub fn write(&mut self, address: u64, data: &[u8]) {
        for (offset, byte) in data.iter().enumerate() {
            self.bytes.insert(address.wrapping_add(offset as u64), *byte);
        }
    }

    /// Writes the bytes of `data` whose bit is set in `mask`, one mask word per
    /// 64 bytes. Returns how many bytes were stored.
    pub fn write_masked(&mut self, address: u64, data: &[u8], mask: &[u64]) -> usize {
        let mut stored = 0;
        for (offset, byte) in data.iter().enumerate() {
            let word = mask.get(offset / 64).copied().unwrap_or(0);
            if (word >> (offset % 64)) & 1 == 1 {
                self.bytes.insert(address.wrapping_add(offset as u64), *byte);
                stored += 1;
            }
        }
        stored
    }

    /// Number of bytes ever written.
    pub fn footprint(&self) -> usize {
        self.bytes.len()
    }
}
