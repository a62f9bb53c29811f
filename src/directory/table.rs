//! Key directory implementation
//!
//! BTreeMap from key hash to descriptor, with a running count of live keys.

use std::collections::btree_map::{self, BTreeMap};

use super::{key_hash, KeyDescriptor};

/// Result of looking a key up by hash
#[derive(Debug)]
pub enum Lookup<'a> {
    /// The key is present (possibly deleted)
    Found(&'a KeyDescriptor),

    /// Nothing stored under this key's hash
    Vacant,

    /// A different key occupies this hash
    Collision(&'a KeyDescriptor),
}

/// In-memory key directory
#[derive(Debug, Default, Clone)]
pub struct KeyDirectory {
    entries: BTreeMap<u32, KeyDescriptor>,
    /// Descriptors whose latest entry is not a tombstone
    live: usize,
}

impl KeyDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from descriptors produced by recovery
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = KeyDescriptor>) -> Self {
        let mut directory = Self::new();
        for descriptor in descriptors {
            directory.insert(descriptor);
        }
        directory
    }

    /// Look `key` up, distinguishing a miss from a hash collision
    pub fn lookup(&self, key: &[u8]) -> Lookup<'_> {
        match self.entries.get(&key_hash(key)) {
            Some(d) if d.key == key => Lookup::Found(d),
            Some(d) => Lookup::Collision(d),
            None => Lookup::Vacant,
        }
    }

    /// Descriptor for `key`, including deleted keys
    pub fn get(&self, key: &[u8]) -> Option<&KeyDescriptor> {
        match self.lookup(key) {
            Lookup::Found(d) => Some(d),
            _ => None,
        }
    }

    pub fn get_by_hash(&self, hash: u32) -> Option<&KeyDescriptor> {
        self.entries.get(&hash)
    }

    /// Insert or replace a descriptor, returning the previous one
    pub fn insert(&mut self, descriptor: KeyDescriptor) -> Option<KeyDescriptor> {
        if !descriptor.deleted {
            self.live += 1;
        }
        let previous = self.entries.insert(descriptor.key_hash, descriptor);
        if let Some(old) = &previous {
            if !old.deleted {
                self.live -= 1;
            }
        }
        previous
    }

    /// Remove the descriptor stored under `hash`
    pub fn remove(&mut self, hash: u32) -> Option<KeyDescriptor> {
        let removed = self.entries.remove(&hash);
        if let Some(old) = &removed {
            if !old.deleted {
                self.live -= 1;
            }
        }
        removed
    }

    /// Point one copy of `hash` at a new address
    pub fn replace_address(&mut self, hash: u32, old: u32, new: u32) {
        if let Some(descriptor) = self.entries.get_mut(&hash) {
            for address in descriptor.addresses.iter_mut() {
                if *address == old {
                    *address = new;
                }
            }
        }
    }

    /// Forget one copy of `hash`; returns the number of copies left
    pub fn remove_address(&mut self, hash: u32, address: u32) -> usize {
        match self.entries.get_mut(&hash) {
            Some(descriptor) => {
                descriptor.addresses.retain(|&a| a != address);
                descriptor.addresses.len()
            }
            None => 0,
        }
    }

    /// Drop `sector` from every shadow list after it was erased
    pub fn clear_shadow(&mut self, sector: u32) {
        for descriptor in self.entries.values_mut() {
            descriptor.shadows.retain(|&s| s != sector);
        }
    }

    /// Hashes of descriptors with a copy in `sector`
    pub fn resident_in(&self, sector: u32, sector_size: u32) -> Vec<u32> {
        self.entries
            .values()
            .filter(|d| d.has_copy_in(sector, sector_size))
            .map(|d| d.key_hash)
            .collect()
    }

    /// All descriptors in hash order, deleted ones included
    pub fn descriptors(&self) -> btree_map::Values<'_, u32, KeyDescriptor> {
        self.entries.values()
    }

    /// Number of live (non-deleted) keys
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Number of deleted keys still tracked
    pub fn deleted_count(&self) -> usize {
        self.entries.len() - self.live
    }

    /// Number of descriptors, deleted ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
