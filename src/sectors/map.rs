//! Sector map implementation
//!
//! Vec-backed table of sector descriptors with allocation and victim
//! selection policies.

use tracing::debug;

use crate::flash::Geometry;

use super::{HeaderState, SectorDescriptor, SectorState};

/// Bookkeeping for every sector of a partition
#[derive(Debug, Clone)]
pub struct SectorMap {
    sectors: Vec<SectorDescriptor>,
    sector_size: u32,
    /// First entry offset in every sector (padded header size)
    data_start: u32,
    /// Empty sectors regular writes must leave for GC
    reserved: u32,
}

impl SectorMap {
    /// Create a map with every sector Empty and unformatted
    pub fn new(geometry: &Geometry, data_start: u32, reserved: u32) -> Self {
        let sectors = (0..geometry.sector_count)
            .map(|id| SectorDescriptor {
                id,
                state: SectorState::Empty,
                header: HeaderState::Missing,
                write_head: data_start,
                live_bytes: 0,
                stale_bytes: 0,
                erase_count: 0,
            })
            .collect();

        Self {
            sectors,
            sector_size: geometry.sector_size,
            data_start,
            reserved,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&SectorDescriptor> {
        self.sectors.get(id as usize)
    }

    pub(crate) fn get_mut(&mut self, id: u32) -> &mut SectorDescriptor {
        &mut self.sectors[id as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &SectorDescriptor> {
        self.sectors.iter()
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    pub fn data_start(&self) -> u32 {
        self.data_start
    }

    /// Bytes of one sector usable for entries
    pub fn capacity(&self) -> u32 {
        self.sector_size - self.data_start
    }

    /// Sector holding partition address `address`
    pub fn sector_of(&self, address: u32) -> u32 {
        address / self.sector_size
    }

    /// Number of sectors in the Empty state
    pub fn empty_count(&self) -> usize {
        self.count(SectorState::Empty)
    }

    pub fn count(&self, state: SectorState) -> usize {
        self.sectors.iter().filter(|s| s.state == state).count()
    }

    // =========================================================================
    // Accounting
    // =========================================================================

    /// Record an append of `size` bytes at the write head of `id`
    pub(crate) fn record_write(&mut self, id: u32, size: u32, live: bool) {
        let sector_size = self.sector_size;
        let sector = self.get_mut(id);
        sector.write_head += size;
        if live {
            sector.live_bytes += size;
        } else {
            sector.stale_bytes += size;
        }

        if sector.state == SectorState::Empty {
            sector.state = SectorState::Writable;
        }
        if sector.state == SectorState::Writable && sector.write_head >= sector_size {
            sector.state = SectorState::Full;
        }
    }

    /// Reclassify a live entry at `address` as stale
    pub(crate) fn mark_stale(&mut self, address: u32, size: u32) {
        let id = self.sector_of(address);
        let sector = self.get_mut(id);
        debug_assert!(sector.live_bytes >= size, "sector {} live underflow", id);
        sector.live_bytes = sector.live_bytes.saturating_sub(size);
        sector.stale_bytes += size;
    }

    /// Move `id` to the absorbing Corrupt state
    pub(crate) fn mark_corrupt(&mut self, id: u32) {
        self.get_mut(id).state = SectorState::Corrupt;
    }

    pub(crate) fn set_state(&mut self, id: u32, state: SectorState) {
        self.get_mut(id).state = state;
    }

    /// Forget all entries of `id` after a successful erase
    pub(crate) fn reset_erased(&mut self, id: u32) {
        let data_start = self.data_start;
        let sector = self.get_mut(id);
        sector.state = SectorState::Empty;
        sector.header = HeaderState::Missing;
        sector.write_head = data_start;
        sector.live_bytes = 0;
        sector.stale_bytes = 0;
        sector.erase_count += 1;
    }

    // =========================================================================
    // Allocation Policy
    // =========================================================================

    /// Best-fitting Writable sector with room for `size` bytes
    ///
    /// Prefers the fullest sector that still fits, so partially written
    /// sectors are finished before new ones are opened.
    pub fn find_writable(&self, size: u32, exclude: &[u32]) -> Option<u32> {
        self.sectors
            .iter()
            .filter(|s| s.state == SectorState::Writable && !exclude.contains(&s.id))
            .filter(|s| s.free_bytes(self.sector_size) >= size)
            .min_by_key(|s| (s.free_bytes(self.sector_size), s.id))
            .map(|s| s.id)
    }

    /// Roll Writable sectors that cannot take `size` more bytes over to Full
    pub(crate) fn roll_over_unfit(&mut self, size: u32) {
        let sector_size = self.sector_size;
        for sector in self.sectors.iter_mut() {
            if sector.state == SectorState::Writable && sector.free_bytes(sector_size) < size {
                debug!(sector = sector.id, write_head = sector.write_head, "rolling sector over to full");
                sector.state = SectorState::Full;
            }
        }
    }

    /// Least-worn Empty sector not in `exclude`
    ///
    /// Unless `use_reserve` is set, the last `reserved` Empty sectors are
    /// never handed out so GC always has a destination.
    pub fn pick_empty(&self, exclude: &[u32], use_reserve: bool) -> Option<u32> {
        if !use_reserve && self.empty_count() <= self.reserved as usize {
            return None;
        }

        self.sectors
            .iter()
            .filter(|s| s.state == SectorState::Empty && !exclude.contains(&s.id))
            .min_by_key(|s| (s.erase_count, s.id))
            .map(|s| s.id)
    }

    /// Full sector whose erase reclaims the most space
    ///
    /// All sectors share one capacity, so the fewest live bytes is the
    /// lowest live ratio. Ties go to the least-worn sector.
    pub fn gc_victim(&self, exclude: &[u32]) -> Option<u32> {
        self.sectors
            .iter()
            .filter(|s| s.state == SectorState::Full && s.is_reclaimable())
            .filter(|s| !exclude.contains(&s.id))
            .min_by_key(|s| (s.live_bytes, s.erase_count, s.id))
            .map(|s| s.id)
    }

    /// Least-worn Full sector lagging the most-worn one by more than `threshold`
    ///
    /// Sectors holding only unchanging data are never picked by
    /// [`gc_victim`](Self::gc_victim); moving their data out lets them
    /// take their share of erases.
    pub fn wear_leveling_victim(&self, threshold: u32, exclude: &[u32]) -> Option<u32> {
        if threshold == 0 {
            return None;
        }

        let (_, max) = self.erase_count_range();
        self.sectors
            .iter()
            .filter(|s| s.state == SectorState::Full && !exclude.contains(&s.id))
            .filter(|s| s.erase_count.saturating_add(threshold) < max)
            .min_by_key(|s| (s.erase_count, s.live_bytes, s.id))
            .map(|s| s.id)
    }

    // =========================================================================
    // Totals
    // =========================================================================

    pub fn live_bytes(&self) -> u64 {
        self.sectors.iter().map(|s| s.live_bytes as u64).sum()
    }

    pub fn stale_bytes(&self) -> u64 {
        self.sectors.iter().map(|s| s.stale_bytes as u64).sum()
    }

    /// Bytes still appendable in Empty and Writable sectors
    pub fn free_bytes(&self) -> u64 {
        self.sectors
            .iter()
            .filter(|s| matches!(s.state, SectorState::Empty | SectorState::Writable))
            .map(|s| s.free_bytes(self.sector_size) as u64)
            .sum()
    }

    pub fn erase_count_range(&self) -> (u32, u32) {
        let min = self.sectors.iter().map(|s| s.erase_count).min().unwrap_or(0);
        let max = self.sectors.iter().map(|s| s.erase_count).max().unwrap_or(0);
        (min, max)
    }
}
