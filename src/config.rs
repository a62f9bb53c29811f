//! Configuration for SectorKV
//!
//! Store-wide settings passed at construction, with sensible defaults.
//! Several differently configured stores can coexist in one process.

use std::sync::Arc;

use crate::checksum::{ChecksumAlgorithm, Crc32};
use crate::entry::{header_size, MAX_KEY_LEN};
use crate::error::{KvError, Result};
use crate::flash::Geometry;
use crate::sectors::SECTOR_HEADER_SIZE;

/// Main configuration for a Store instance
#[derive(Debug, Clone)]
pub struct StoreConfig {
    // -------------------------------------------------------------------------
    // Directory Configuration
    // -------------------------------------------------------------------------
    /// Max number of live (non-deleted) keys
    pub max_entries: usize,

    /// Max key length in bytes (at most 255, the on-flash field is one byte)
    pub max_key_len: usize,

    /// Max value length in bytes
    pub max_value_len: usize,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// Number of copies of every entry, each in a different sector
    pub redundancy: usize,

    /// Checksum applied to every entry; its width is part of the layout
    pub checksum: Arc<dyn ChecksumAlgorithm>,

    // -------------------------------------------------------------------------
    // Garbage Collection Configuration
    // -------------------------------------------------------------------------
    /// Run one GC pass after a write once the number of empty sectors is
    /// at or below this mark (0 = only when space is needed)
    pub gc_low_water: usize,

    /// After a GC pass, also move the data out of the least-worn Full
    /// sector once its erase count trails the most-worn sector by more
    /// than this (0 = never)
    pub wear_leveling_threshold: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_entries: 256,
            max_key_len: 64,
            max_value_len: 1024,
            redundancy: 1,
            checksum: Arc::new(Crc32),
            gc_low_water: 0,
            wear_leveling_threshold: 8,
        }
    }
}

impl StoreConfig {
    /// Create a new config builder
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// Number of empty sectors kept back as GC destination
    pub fn reserved_sectors(geometry: &Geometry) -> u32 {
        if geometry.sector_count >= 2 {
            1
        } else {
            0
        }
    }

    /// Check this configuration can be used with `geometry`
    pub fn validate(&self, geometry: &Geometry) -> Result<()> {
        if !geometry.is_valid() {
            return Err(KvError::Config(format!(
                "invalid flash geometry: {:?}",
                geometry
            )));
        }

        let width = self.checksum.width();
        if !(1..=8).contains(&width) {
            return Err(KvError::Config(format!(
                "checksum width must be 1..=8 bytes, got {}",
                width
            )));
        }

        if self.max_key_len == 0 || self.max_key_len > MAX_KEY_LEN {
            return Err(KvError::Config(format!(
                "max_key_len must be 1..={}, got {}",
                MAX_KEY_LEN, self.max_key_len
            )));
        }

        if self.max_value_len > u16::MAX as usize {
            return Err(KvError::Config(format!(
                "max_value_len must be at most {}, got {}",
                u16::MAX,
                self.max_value_len
            )));
        }

        if self.max_entries == 0 {
            return Err(KvError::Config("max_entries must be non-zero".to_string()));
        }

        let usable = geometry.sector_count - Self::reserved_sectors(geometry);
        if self.redundancy == 0 || self.redundancy > usable as usize {
            return Err(KvError::Config(format!(
                "redundancy must be 1..={} for {} sectors, got {}",
                usable, geometry.sector_count, self.redundancy
            )));
        }

        // One sector must hold its header plus the smallest possible entry
        let minimal = geometry.align_up(SECTOR_HEADER_SIZE)
            + geometry.align_up(header_size(width) + 1);
        if minimal > geometry.sector_size as usize {
            return Err(KvError::Config(format!(
                "sector size {} cannot hold metadata ({} bytes needed)",
                geometry.sector_size, minimal
            )));
        }

        Ok(())
    }
}

/// Builder for StoreConfig
#[derive(Default)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Set the max number of live keys
    pub fn max_entries(mut self, count: usize) -> Self {
        self.config.max_entries = count;
        self
    }

    /// Set the max key length (in bytes)
    pub fn max_key_len(mut self, len: usize) -> Self {
        self.config.max_key_len = len;
        self
    }

    /// Set the max value length (in bytes)
    pub fn max_value_len(mut self, len: usize) -> Self {
        self.config.max_value_len = len;
        self
    }

    /// Set the number of redundant copies per entry
    pub fn redundancy(mut self, copies: usize) -> Self {
        self.config.redundancy = copies;
        self
    }

    /// Set the checksum algorithm
    pub fn checksum(mut self, checksum: impl ChecksumAlgorithm + 'static) -> Self {
        self.config.checksum = Arc::new(checksum);
        self
    }

    /// Set the GC low-water mark (in empty sectors)
    pub fn gc_low_water(mut self, sectors: usize) -> Self {
        self.config.gc_low_water = sectors;
        self
    }

    /// Set the erase-count gap that triggers static wear leveling
    pub fn wear_leveling_threshold(mut self, cycles: u32) -> Self {
        self.config.wear_leveling_threshold = cycles;
        self
    }

    pub fn build(self) -> StoreConfig {
        self.config
    }
}
