//! Store recovery
//!
//! Rebuilds the key directory and sector map from flash contents.
//!
//! Each sector is read and handed to a [`SectorScanner`]; the scan items
//! are then interpreted here:
//! 1. Highest transaction id per key wins
//! 2. Equal transaction ids are copies of the same write (redundancy, or a
//!    GC relocation interrupted before the erase)
//! 3. A winning tombstone marks the key deleted
//! 4. Everything else is stale, and its sector becomes a shadow of the key
//!
//! Corrupt regions (including a torn trailing entry) are skipped and
//! counted as stale; appends resume at the first erased aligned offset.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::directory::{key_hash, KeyDescriptor, KeyDirectory};
use crate::entry::{header_size, EntryKind, ScanItem, SectorScanner};
use crate::error::{KvError, Result};
use crate::flash::{FlashPartition, Geometry};
use crate::sectors::{decode_header, HeaderState, SectorMap, SectorState};

/// Result of a recovery scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Number of valid entries decoded
    pub entries_recovered: u64,

    /// Number of corrupt regions skipped
    pub entries_corrupted: u64,

    /// Bytes covered by corrupt regions
    pub corrupt_bytes: u64,

    /// Highest transaction id found on flash
    pub last_transaction_id: u32,

    /// Sectors whose last write was cut short (trailing corrupt region)
    pub sectors_torn: u32,

    /// Sectors closed for appends because their header was unusable
    pub sectors_rolled_over: u32,
}

/// State rebuilt by a recovery scan
pub(crate) struct Recovered {
    pub directory: KeyDirectory,
    pub sectors: SectorMap,
    pub report: RecoveryReport,
}

/// One valid entry seen during the scan
struct Found {
    address: u32,
    size: u32,
    transaction_id: u32,
    kind: EntryKind,
    key: Vec<u8>,
}

/// Scan every sector of `flash` and rebuild the store state
pub(crate) fn recover<F: FlashPartition>(
    flash: &mut F,
    geometry: &Geometry,
    config: &StoreConfig,
) -> Result<Recovered> {
    let data_start = geometry.align_up(crate::sectors::SECTOR_HEADER_SIZE) as u32;
    let reserved = StoreConfig::reserved_sectors(geometry);
    let mut sectors = SectorMap::new(geometry, data_start, reserved);
    let mut report = RecoveryReport::default();
    let mut found = Vec::new();

    // Smallest entry that could still be appended
    let min_entry = geometry.align_up(header_size(config.checksum.width()) + 1) as u32;

    for id in 0..geometry.sector_count {
        let image = flash.read_sector(id)?;
        let base = geometry.sector_address(id);
        let (header, erase_count) = decode_header(&image[..data_start as usize]);

        let mut scanner = SectorScanner::new(
            &image,
            base,
            data_start as usize,
            config.checksum.as_ref(),
            geometry.alignment,
        );

        let mut corrupt_bytes = 0u32;
        let mut torn = false;
        for item in scanner.by_ref() {
            match item {
                ScanItem::Entry {
                    address,
                    entry,
                    size,
                } => {
                    report.entries_recovered += 1;
                    torn = false;
                    found.push(Found {
                        address,
                        size: size as u32,
                        transaction_id: entry.transaction_id,
                        kind: entry.kind,
                        key: entry.key,
                    });
                }
                ScanItem::Corrupt {
                    address,
                    len,
                    error,
                } => {
                    warn!(sector = id, address, len, %error, "skipping corrupt region");
                    report.entries_corrupted += 1;
                    report.corrupt_bytes += len as u64;
                    corrupt_bytes += len as u32;
                    torn = true;
                }
            }
        }

        let write_head = scanner.write_head() as u32;
        if torn {
            debug!(sector = id, write_head, "sector ends in a torn write");
            report.sectors_torn += 1;
        }
        let sector = sectors.get_mut(id);
        sector.header = header;
        sector.erase_count = erase_count;
        sector.write_head = write_head;
        sector.stale_bytes = corrupt_bytes;
        sector.state = if write_head == data_start {
            SectorState::Empty
        } else if sector.free_bytes(geometry.sector_size) < min_entry {
            SectorState::Full
        } else {
            SectorState::Writable
        };

        match header {
            HeaderState::Valid => {}
            HeaderState::Missing if sector.state == SectorState::Empty => {}
            HeaderState::Missing | HeaderState::Invalid => {
                warn!(sector = id, ?header, "sector header unusable, closing sector for appends");
                sector.state = SectorState::Full;
                report.sectors_rolled_over += 1;
            }
        }

        debug!(
            sector = id,
            state = ?sector.state,
            write_head,
            erase_count,
            "scanned sector"
        );
    }

    if geometry.sector_count > 0
        && sectors.iter().all(|s| s.header == HeaderState::Invalid)
    {
        return Err(KvError::Corrupt(
            "no sector carries a usable header; partition needs formatting".to_string(),
        ));
    }

    // Init writes a header to every unused sector, so next to valid headers
    // a missing one means the header rewrite after an erase never happened
    let worst = sectors
        .iter()
        .filter(|s| s.header == HeaderState::Valid)
        .map(|s| s.erase_count)
        .max();
    if let Some(worst) = worst {
        for id in 0..geometry.sector_count {
            let sector = sectors.get_mut(id);
            if sector.header != HeaderState::Valid {
                sector.erase_count = worst.saturating_add(1);
                debug!(
                    sector = id,
                    erase_count = sector.erase_count,
                    "erase count lost with the header, assuming most worn"
                );
            }
        }
    }

    report.last_transaction_id = found.iter().map(|f| f.transaction_id).max().unwrap_or(0);

    let descriptors = resolve(&found, geometry, config)?;

    // Live bytes belong to current copies of non-deleted keys; all else is stale
    for f in &found {
        let current = descriptors
            .get(&key_hash(&f.key))
            .map(|d| !d.deleted && d.addresses.contains(&f.address))
            .unwrap_or(false);
        let sector = sectors.get_mut(geometry.sector_of(f.address));
        if current {
            sector.live_bytes += f.size;
        } else {
            sector.stale_bytes += f.size;
        }
    }

    let directory = KeyDirectory::from_descriptors(descriptors.into_values());
    if directory.live_count() > config.max_entries {
        warn!(
            keys = directory.live_count(),
            limit = config.max_entries,
            "partition holds more keys than configured, new keys will be refused"
        );
    }

    Ok(Recovered {
        directory,
        sectors,
        report,
    })
}

/// Pick the winning entry for every key
fn resolve(
    found: &[Found],
    geometry: &Geometry,
    config: &StoreConfig,
) -> Result<BTreeMap<u32, KeyDescriptor>> {
    let mut descriptors: BTreeMap<u32, KeyDescriptor> = BTreeMap::new();

    for f in found {
        let hash = key_hash(&f.key);
        let sector = geometry.sector_of(f.address);
        let deleted = f.kind == EntryKind::Tombstone;

        let Some(current) = descriptors.get_mut(&hash) else {
            descriptors.insert(
                hash,
                KeyDescriptor::new(&f.key, vec![f.address], f.size, f.transaction_id, deleted),
            );
            continue;
        };

        if current.key != f.key {
            return Err(KvError::Corrupt(format!(
                "keys {:?} and {:?} share hash {:#010x}",
                String::from_utf8_lossy(&current.key),
                String::from_utf8_lossy(&f.key),
                hash
            )));
        }

        if f.transaction_id > current.transaction_id {
            let superseded: Vec<u32> = current
                .addresses
                .iter()
                .map(|&a| geometry.sector_of(a))
                .collect();
            for s in superseded {
                current.add_shadow(s);
            }
            current.addresses = vec![f.address];
            current.size = f.size;
            current.transaction_id = f.transaction_id;
            current.deleted = deleted;
        } else if f.transaction_id == current.transaction_id
            && current.deleted == deleted
            && current.size == f.size
            && current.addresses.len() < config.redundancy
            && !current.has_copy_in(sector, geometry.sector_size)
        {
            current.addresses.push(f.address);
        } else {
            if f.transaction_id == current.transaction_id {
                debug!(address = f.address, "extra copy of transaction {}", f.transaction_id);
            }
            current.add_shadow(sector);
        }
    }

    Ok(descriptors)
}
