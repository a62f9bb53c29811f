//! Checksum algorithms
//!
//! The store is handed one algorithm at construction and applies it to
//! every entry. The width of the checksum field on flash follows the
//! algorithm and is not recorded per entry.

use std::fmt;

/// Checksum algorithm applied to every entry
pub trait ChecksumAlgorithm: Send + Sync + fmt::Debug {
    /// Number of bytes the checksum occupies in an entry header (1..=8)
    fn width(&self) -> usize;

    /// Compute the checksum of `data`
    ///
    /// Only the low `width()` bytes are stored.
    fn compute(&self, data: &[u8]) -> u64;

    /// Compute over several slices as if they were concatenated
    fn compute_parts(&self, parts: &[&[u8]]) -> u64 {
        let joined: Vec<u8> = parts.concat();
        self.compute(&joined)
    }
}

/// CRC-32 (IEEE) via crc32fast
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32;

impl ChecksumAlgorithm for Crc32 {
    fn width(&self) -> usize {
        4
    }

    fn compute(&self, data: &[u8]) -> u64 {
        crc32fast::hash(data) as u64
    }

    fn compute_parts(&self, parts: &[&[u8]]) -> u64 {
        let mut hasher = crc32fast::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        hasher.finalize() as u64
    }
}

/// Mask a checksum value down to `width` bytes
pub fn truncate(value: u64, width: usize) -> u64 {
    if width >= 8 {
        value
    } else {
        value & ((1u64 << (width * 8)) - 1)
    }
}
