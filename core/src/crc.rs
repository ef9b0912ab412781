//! CRC32C (Castagnoli) used for group and index-image integrity checks.
//!
//! Table and streaming hasher adapted from the Helix kernel filesystem
//! hashing module (`fs/src/core/hash.rs`).

// ============================================================================
// Lookup Table
// ============================================================================

/// Reflected Castagnoli polynomial
const POLYNOMIAL: u32 = 0x82F6_3B78;

const CRC32C_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLYNOMIAL;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

// ============================================================================
// Streaming Calculator
// ============================================================================

/// Incremental CRC32C
#[derive(Clone, Debug)]
pub struct Crc32c {
    crc: u32,
}

impl Crc32c {
    /// Fresh calculator
    #[inline]
    pub const fn new() -> Self {
        Self { crc: !0u32 }
    }

    /// Feed bytes
    #[inline]
    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            let index = ((self.crc ^ byte as u32) & 0xFF) as usize;
            self.crc = (self.crc >> 8) ^ CRC32C_TABLE[index];
        }
    }

    /// Final value
    #[inline]
    pub fn finish(self) -> u32 {
        !self.crc
    }

    /// One-shot checksum
    #[inline]
    pub fn checksum(data: &[u8]) -> u32 {
        let mut crc = Self::new();
        crc.update(data);
        crc.finish()
    }
}

impl Default for Crc32c {
    fn default() -> Self {
        Self::new()
    }
}

/// Split `data` into payload and its little-endian 32-bit checksum trailer
///
/// Returns `None` when `data` is too short to carry a trailer.
pub fn split_trailer(data: &[u8]) -> Option<(&[u8], u32)> {
    let split = data.len().checked_sub(4)?;
    let (payload, trailer) = data.split_at(split);
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    Some((payload, expected))
}
