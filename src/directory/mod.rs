//! Key Directory Module
//!
//! In-memory index from key to the flash location of its current entry.
//!
//! ## Responsibilities
//! - One descriptor per key, addressed by key hash
//! - Track every redundant copy of the current entry
//! - Remember deleted keys until their tombstones are no longer needed
//! - Remember which sectors still hold superseded entries ("shadows"),
//!   so a tombstone is never dropped while an older value could reappear
//!
//! ## Data Structure Choice
//! BTreeMap keyed by hash: deterministic enumeration order, and a hash
//! collision between two distinct keys is detected on insert.

mod table;

pub use table::{KeyDirectory, Lookup};

/// Hash used to index keys
pub fn key_hash(key: &[u8]) -> u32 {
    crc32fast::hash(key)
}

/// Location and version of the current entry for one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescriptor {
    pub key_hash: u32,
    pub key: Vec<u8>,
    /// Partition address of each copy; the first is read first
    pub addresses: Vec<u32>,
    /// Padded on-flash size of each copy
    pub size: u32,
    pub transaction_id: u32,
    /// Latest entry is a tombstone
    pub deleted: bool,
    /// Sectors still holding superseded entries for this key
    pub shadows: Vec<u32>,
}

impl KeyDescriptor {
    pub fn new(key: &[u8], addresses: Vec<u32>, size: u32, transaction_id: u32, deleted: bool) -> Self {
        Self {
            key_hash: key_hash(key),
            key: key.to_vec(),
            addresses,
            size,
            transaction_id,
            deleted,
            shadows: Vec::new(),
        }
    }

    /// Remember that `sector` holds an older entry for this key
    pub fn add_shadow(&mut self, sector: u32) {
        if !self.shadows.contains(&sector) {
            self.shadows.push(sector);
        }
    }

    /// True if any copy lives in `sector`
    pub fn has_copy_in(&self, sector: u32, sector_size: u32) -> bool {
        self.addresses.iter().any(|&a| a / sector_size == sector)
    }

    /// True if an older entry may survive somewhere other than `sector`
    pub fn shadowed_outside(&self, sector: u32) -> bool {
        self.shadows.iter().any(|&s| s != sector)
    }
}
