//! Store Module
//!
//! The orchestrator that owns the partition, key directory, and sector map.
//!
//! ## Responsibilities
//! - Rebuild state from flash on attach (recovery scan)
//! - Serve get/put/delete/enumerate
//! - Allocate sectors for appends and keep one in reserve for GC
//! - Run garbage collection inline when space runs out
//!
//! ## Concurrency Model
//! One owner per partition. Every mutating call takes `&mut self` and there
//! is no internal locking; callers serialize their own access. Key
//! enumeration borrows the store, so it cannot overlap a put or delete.

mod gc;
mod iterator;
mod recovery;

use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::directory::{KeyDescriptor, KeyDirectory, Lookup};
use crate::entry::{decode, encode, entry_size, Entry};
use crate::error::{KvError, Result};
use crate::flash::{FlashPartition, Geometry};
use crate::sectors::{encode_header, HeaderState, SectorDescriptor, SectorMap, SectorState};

pub use iterator::Keys;
pub use recovery::RecoveryReport;

/// Space and key usage snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Live (non-deleted) keys
    pub key_count: usize,
    /// Deleted keys whose tombstones are still tracked
    pub deleted_count: usize,
    pub sector_count: usize,
    pub empty_sectors: usize,
    pub corrupt_sectors: usize,
    /// Bytes of current entries for live keys
    pub live_bytes: u64,
    /// Bytes reclaimable by GC
    pub stale_bytes: u64,
    /// Bytes still appendable without GC
    pub free_bytes: u64,
    /// Bytes written since the last erase of each sector, headers included
    pub used_bytes: u64,
    pub min_erase_count: u32,
    pub max_erase_count: u32,
}

/// Log-structured key-value store on a flash partition
pub struct Store<F: FlashPartition> {
    /// Exclusively owned partition
    flash: F,

    /// Partition geometry, fixed for the attachment
    geometry: Geometry,

    config: StoreConfig,

    /// Key → current entry location(s)
    directory: KeyDirectory,

    /// Per-sector state and byte accounting
    sectors: SectorMap,

    /// Last transaction id handed out or found on flash
    transaction_id: u32,

    /// Outcome of the most recent recovery scan
    last_recovery: RecoveryReport,
}

impl<F: FlashPartition> Store<F> {
    /// Attach to a partition and recover its contents
    ///
    /// An erased partition yields an empty store.
    pub fn open(flash: F, config: StoreConfig) -> Result<Self> {
        let geometry = flash.geometry();
        config.validate(&geometry)?;

        let data_start = geometry.align_up(crate::sectors::SECTOR_HEADER_SIZE) as u32;
        let reserved = StoreConfig::reserved_sectors(&geometry);

        let mut store = Self {
            flash,
            geometry,
            config,
            directory: KeyDirectory::new(),
            sectors: SectorMap::new(&geometry, data_start, reserved),
            transaction_id: 0,
            last_recovery: RecoveryReport::default(),
        };
        store.init()?;
        Ok(store)
    }

    /// Erase every sector, then attach to the now empty partition
    ///
    /// Erase counts from valid sector headers are carried over.
    pub fn format(mut flash: F, config: StoreConfig) -> Result<Self> {
        let geometry = flash.geometry();
        config.validate(&geometry)?;

        let header_len = geometry.align_up(crate::sectors::SECTOR_HEADER_SIZE);
        for id in 0..geometry.sector_count {
            let address = geometry.sector_address(id);
            let header = flash.read_vec(address, header_len)?;
            let (state, erase_count) = crate::sectors::decode_header(&header);
            let erase_count = if state == HeaderState::Valid { erase_count } else { 0 };

            flash.erase(id)?;
            flash.write(address, &encode_header(erase_count + 1, header_len))?;
        }

        info!(sectors = geometry.sector_count, "formatted partition");
        Self::open(flash, config)
    }

    /// Rebuild directory and sector map from flash
    ///
    /// Runs at open; call again to re-attach after the flash contents were
    /// changed underneath (e.g. a simulated reset).
    pub fn init(&mut self) -> Result<RecoveryReport> {
        let recovered = recovery::recover(&mut self.flash, &self.geometry, &self.config)?;

        self.directory = recovered.directory;
        self.sectors = recovered.sectors;
        self.transaction_id = recovered.report.last_transaction_id;
        self.last_recovery = recovered.report.clone();

        // Claim unused sectors so their erase counts are on flash from now on
        let unclaimed: Vec<u32> = self
            .sectors
            .iter()
            .filter(|s| s.state == SectorState::Empty && s.header != HeaderState::Valid)
            .map(|s| s.id)
            .collect();
        for id in unclaimed {
            if let Err(e) = self.prepare_sector(id) {
                warn!(sector = id, error = %e, "could not claim sector");
            }
        }

        let report = recovered.report;
        info!(
            keys = self.directory.live_count(),
            entries = report.entries_recovered,
            corrupted = report.entries_corrupted,
            transaction_id = self.transaction_id,
            "store initialized"
        );
        if report.entries_corrupted > 0 {
            warn!(
                regions = report.entries_corrupted,
                bytes = report.corrupt_bytes,
                "recovery skipped corrupt data"
            );
        }

        Ok(report)
    }

    // =========================================================================
    // Public Operations
    // =========================================================================

    /// Get the value stored under `key`
    ///
    /// Returns `NotFound` for absent or deleted keys and `DataLoss` when no
    /// copy of the entry passes its checksum.
    pub fn get(&mut self, key: &[u8]) -> Result<Vec<u8>> {
        let descriptor = match self.directory.get(key) {
            Some(d) if !d.deleted => d.clone(),
            _ => return Err(KvError::NotFound),
        };

        let mut failure = None;
        for &address in &descriptor.addresses {
            match self.read_copy(&descriptor, address) {
                Ok(entry) => return Ok(entry.value),
                Err(e) => {
                    warn!(address, error = %e, "copy unreadable, trying next");
                    // Flash failures take precedence over checksum failures
                    if failure.is_none() || matches!(e, KvError::Flash(_)) {
                        failure = Some(e);
                    }
                }
            }
        }

        Err(failure.unwrap_or(KvError::DataLoss { address: 0 }))
    }

    /// Store `value` under `key`, replacing any previous value
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key(key)?;

        if value.len() > self.config.max_value_len {
            return Err(KvError::InvalidArgument(format!(
                "value of {} bytes exceeds limit of {}",
                value.len(),
                self.config.max_value_len
            )));
        }

        let size = entry_size(
            self.config.checksum.width(),
            key.len(),
            value.len(),
            self.geometry.alignment,
        );
        if size > self.sectors.capacity() as usize {
            return Err(KvError::InvalidArgument(format!(
                "entry of {} bytes does not fit a sector ({} bytes)",
                size,
                self.sectors.capacity()
            )));
        }

        let is_new = match self.directory.lookup(key) {
            Lookup::Found(d) => d.deleted,
            Lookup::Vacant => true,
            Lookup::Collision(other) => {
                return Err(KvError::InvalidArgument(format!(
                    "key hash collides with stored key {:?}",
                    String::from_utf8_lossy(&other.key)
                )))
            }
        };

        if is_new && self.directory.live_count() >= self.config.max_entries {
            return Err(KvError::ResourceExhausted(format!(
                "key limit of {} reached",
                self.config.max_entries
            )));
        }

        let transaction_id = self.next_transaction_id()?;
        self.write_entry(Entry::value(transaction_id, key, value))
    }

    /// Delete `key` by appending a tombstone
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.check_key(key)?;

        match self.directory.get(key) {
            Some(d) if !d.deleted => {}
            _ => return Err(KvError::NotFound),
        }

        let transaction_id = self.next_transaction_id()?;
        self.write_entry(Entry::tombstone(transaction_id, key))
    }

    /// Lazy iterator over live keys in directory order
    pub fn keys(&self) -> Keys<'_> {
        Keys::new(self.directory.descriptors())
    }

    /// True if `key` is present and not deleted
    pub fn contains(&self, key: &[u8]) -> bool {
        matches!(self.directory.get(key), Some(d) if !d.deleted)
    }

    /// Run one garbage collection pass now
    ///
    /// Returns the reclaimed sector, or `None` if no sector had anything to
    /// reclaim.
    pub fn collect_garbage(&mut self) -> Result<Option<u32>> {
        self.collect_one(&[])
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.directory.live_count()
    }

    pub fn is_empty(&self) -> bool {
        self.directory.live_count() == 0
    }

    /// Last transaction id handed out (or recovered)
    pub fn transaction_id(&self) -> u32 {
        self.transaction_id
    }

    pub fn stats(&self) -> StoreStats {
        let (min_erase_count, max_erase_count) = self.sectors.erase_count_range();
        let used_bytes = self
            .sectors
            .iter()
            .filter(|s| s.write_head > self.sectors.data_start() || s.header != HeaderState::Missing)
            .map(|s| s.write_head as u64)
            .sum();

        StoreStats {
            key_count: self.directory.live_count(),
            deleted_count: self.directory.deleted_count(),
            sector_count: self.sectors.len(),
            empty_sectors: self.sectors.empty_count(),
            corrupt_sectors: self.sectors.count(SectorState::Corrupt),
            live_bytes: self.sectors.live_bytes(),
            stale_bytes: self.sectors.stale_bytes(),
            free_bytes: self.sectors.free_bytes(),
            used_bytes,
            min_erase_count,
            max_erase_count,
        }
    }

    /// Descriptor of one sector
    pub fn sector(&self, id: u32) -> Option<&SectorDescriptor> {
        self.sectors.get(id)
    }

    /// Descriptors of all sectors
    pub fn sectors(&self) -> impl Iterator<Item = &SectorDescriptor> {
        self.sectors.iter()
    }

    /// Directory descriptor for `key`, deleted keys included
    pub fn descriptor(&self, key: &[u8]) -> Option<&KeyDescriptor> {
        self.directory.get(key)
    }

    pub fn last_recovery(&self) -> &RecoveryReport {
        &self.last_recovery
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// Mutable access to the partition (fault injection in tests)
    ///
    /// Changes made here are not seen until [`Store::init`] runs again.
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Detach, releasing the in-memory state
    pub fn into_flash(self) -> F {
        self.flash
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() || key.len() > self.config.max_key_len {
            return Err(KvError::InvalidArgument(format!(
                "key length must be 1..={}, got {}",
                self.config.max_key_len,
                key.len()
            )));
        }
        Ok(())
    }

    fn next_transaction_id(&mut self) -> Result<u32> {
        let next = self.transaction_id.checked_add(1).ok_or_else(|| {
            KvError::ResourceExhausted("transaction id space exhausted".to_string())
        })?;
        self.transaction_id = next;
        Ok(next)
    }

    /// Read and verify one copy of a descriptor's entry
    fn read_copy(&mut self, descriptor: &KeyDescriptor, address: u32) -> Result<Entry> {
        let bytes = self.flash.read_vec(address, descriptor.size as usize)?;
        let decoded = decode(&bytes, self.config.checksum.as_ref(), self.geometry.alignment)
            .map_err(|e| {
                error!(address, error = %e, "entry failed verification");
                KvError::DataLoss { address }
            })?;

        let entry = decoded.entry;
        if entry.key != descriptor.key || entry.transaction_id != descriptor.transaction_id {
            error!(address, "entry does not match directory");
            return Err(KvError::DataLoss { address });
        }
        Ok(entry)
    }

    /// Append `entry` (all redundant copies) and update the directory
    fn write_entry(&mut self, entry: Entry) -> Result<()> {
        let bytes = encode(&entry, self.config.checksum.as_ref(), self.geometry.alignment);
        let size = bytes.len() as u32;
        let live = !entry.is_tombstone();

        let mut addresses: Vec<u32> = Vec::with_capacity(self.config.redundancy);
        let mut failure = None;

        for _ in 0..self.config.redundancy {
            let pinned: Vec<u32> = addresses.iter().map(|&a| self.sectors.sector_of(a)).collect();
            let written = self
                .find_space(size, &pinned, false)
                .and_then(|sector| self.append(sector, &bytes, live));
            match written {
                Ok(address) => addresses.push(address),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        // Copies already on flash win at the next recovery, so track them now
        if !addresses.is_empty() {
            self.commit(&entry, addresses, size);
        }

        if let Some(e) = failure {
            return Err(e);
        }

        self.maybe_collect()
    }

    /// Point the directory at freshly written copies of `entry`
    fn commit(&mut self, entry: &Entry, addresses: Vec<u32>, size: u32) {
        let mut descriptor = KeyDescriptor::new(
            &entry.key,
            addresses,
            size,
            entry.transaction_id,
            entry.is_tombstone(),
        );

        if let Some(previous) = self.directory.get(&entry.key).cloned() {
            for &address in &previous.addresses {
                if !previous.deleted {
                    self.sectors.mark_stale(address, previous.size);
                }
                descriptor.add_shadow(self.sectors.sector_of(address));
            }
            for &sector in &previous.shadows {
                descriptor.add_shadow(sector);
            }
        }

        debug!(
            key = %String::from_utf8_lossy(&entry.key),
            transaction_id = entry.transaction_id,
            addresses = ?descriptor.addresses,
            deleted = descriptor.deleted,
            "committed entry"
        );
        self.directory.insert(descriptor);
    }

    /// Find a sector with room for `size` bytes, running GC if needed
    ///
    /// `pinned` sectors are neither used as destination nor collected.
    /// With `for_gc` set the reserve sector may be used and no nested GC runs.
    fn find_space(&mut self, size: u32, pinned: &[u32], for_gc: bool) -> Result<u32> {
        // Each GC pass frees one sector; bound the loop by the sector count
        for _ in 0..=self.sectors.len() {
            if let Some(sector) = self.sectors.find_writable(size, pinned) {
                return Ok(sector);
            }

            self.sectors.roll_over_unfit(size);

            if let Some(sector) = self.sectors.pick_empty(pinned, for_gc) {
                self.prepare_sector(sector)?;
                return Ok(sector);
            }

            if for_gc {
                break;
            }

            match self.collect_one(pinned)? {
                Some(sector) => debug!(sector, "reclaimed sector for allocation"),
                None => break,
            }
        }

        Err(KvError::ResourceExhausted(format!(
            "no space for a {} byte entry",
            size
        )))
    }

    /// Make sure an Empty sector carries its header before the first append
    fn prepare_sector(&mut self, id: u32) -> Result<()> {
        let (header_state, erase_count) = match self.sectors.get(id) {
            Some(s) => (s.header, s.erase_count),
            None => return Err(KvError::Corrupt(format!("sector {} out of range", id))),
        };
        if header_state == HeaderState::Valid {
            return Ok(());
        }

        let header = encode_header(erase_count, self.sectors.data_start() as usize);
        let address = self.geometry.sector_address(id);
        if let Err(e) = self.flash.write(address, &header) {
            error!(sector = id, error = %e, "sector header write failed");
            self.sectors.mark_corrupt(id);
            return Err(e.into());
        }

        self.sectors.get_mut(id).header = HeaderState::Valid;
        Ok(())
    }

    /// Program `bytes` at the write head of `sector`
    fn append(&mut self, sector: u32, bytes: &[u8], live: bool) -> Result<u32> {
        let write_head = self.sectors.get(sector).map(|s| s.write_head).unwrap_or(0);
        let address = self.geometry.sector_address(sector) + write_head;

        if let Err(e) = self.flash.write(address, bytes) {
            error!(sector, address, error = %e, "append failed, marking sector corrupt");
            self.sectors.mark_corrupt(sector);
            return Err(e.into());
        }

        self.sectors.record_write(sector, bytes.len() as u32, live);
        Ok(address)
    }

    /// Low-water-mark GC after a successful write
    fn maybe_collect(&mut self) -> Result<()> {
        let low_water = self.config.gc_low_water;
        if low_water == 0 || self.sectors.empty_count() > low_water {
            return Ok(());
        }

        if self.sectors.gc_victim(&[]).is_some() {
            debug!(
                empty = self.sectors.empty_count(),
                low_water, "free sectors at low-water mark"
            );
            self.collect_one(&[])?;
        }
        Ok(())
    }
}
