//! Garbage collection
//!
//! Reclaims one sector per pass:
//! 1. Pick the Full sector with the fewest live bytes (ties: least worn)
//! 2. Copy every live entry out of it, updating the directory per copy
//! 3. Carry tombstones forward while an older entry for the key may still
//!    exist in another sector; drop them otherwise
//! 4. Erase the sector and rewrite its header with the new erase count
//! 5. If the least-worn Full sector now trails the most-worn one by more
//!    than the wear leveling threshold, move its data out and erase it too
//!
//! Copies keep their transaction id, so a crash between step 2 and step 4
//! leaves two identical entries that recovery folds back together.

use tracing::{debug, error, info, warn};

use crate::directory::KeyDescriptor;
use crate::entry::{encode, Entry};
use crate::error::{KvError, Result};
use crate::flash::FlashPartition;
use crate::sectors::SectorState;

use super::Store;

impl<F: FlashPartition> Store<F> {
    /// Run one GC pass, never choosing a sector in `pinned` as victim
    ///
    /// Returns the erased sector, or `None` if nothing was reclaimable.
    pub(super) fn collect_one(&mut self, pinned: &[u32]) -> Result<Option<u32>> {
        let Some(victim) = self.sectors.gc_victim(pinned) else {
            debug!("no sector to reclaim");
            return Ok(None);
        };

        if let Some(sector) = self.sectors.get(victim) {
            debug!(
                victim,
                live = sector.live_bytes,
                stale = sector.stale_bytes,
                erase_count = sector.erase_count,
                "collecting sector"
            );
        }

        self.reclaim(victim)?;
        self.level_wear(pinned);
        Ok(Some(victim))
    }

    /// Relocate what must survive out of `victim`, then erase it
    fn reclaim(&mut self, victim: u32) -> Result<()> {
        self.sectors.set_state(victim, SectorState::Erasing);

        if let Err(e) = self.relocate_from(victim) {
            // Nothing was erased; a later pass can retry this sector
            self.sectors.set_state(victim, SectorState::Full);
            return Err(e);
        }

        self.erase_victim(victim)
    }

    /// Recycle a sector of static data once erase counts drift apart
    ///
    /// Runs right after a reclaim, when the erased victim and the reserve
    /// can both take the relocated entries. Failures are logged and never
    /// fail the operation that triggered GC.
    fn level_wear(&mut self, pinned: &[u32]) {
        let threshold = self.config.wear_leveling_threshold;
        let Some(sector) = self.sectors.wear_leveling_victim(threshold, pinned) else {
            return;
        };

        let (min, max) = self.sectors.erase_count_range();
        info!(sector, min, max, "moving static data for wear leveling");

        if let Err(e) = self.reclaim(sector) {
            warn!(sector, error = %e, "wear leveling pass failed");
        }
    }

    /// Move every entry that must survive out of `victim`
    fn relocate_from(&mut self, victim: u32) -> Result<()> {
        let sector_size = self.geometry.sector_size;

        for hash in self.directory.resident_in(victim, sector_size) {
            let Some(descriptor) = self.directory.get_by_hash(hash).cloned() else {
                continue;
            };

            if descriptor.deleted && !descriptor.shadowed_outside(victim) {
                debug!(
                    key = %String::from_utf8_lossy(&descriptor.key),
                    "dropping tombstone with no older entries left"
                );
                self.directory.remove(hash);
                continue;
            }

            let resident: Vec<u32> = descriptor
                .addresses
                .iter()
                .copied()
                .filter(|&a| self.sectors.sector_of(a) == victim)
                .collect();

            for address in resident {
                self.relocate_copy(&descriptor, address)?;
            }
        }

        Ok(())
    }

    /// Copy one entry out of the victim sector
    fn relocate_copy(&mut self, descriptor: &KeyDescriptor, address: u32) -> Result<()> {
        let hash = descriptor.key_hash;
        let live = !descriptor.deleted;

        let entry = match self.read_for_relocation(descriptor, address) {
            Ok(entry) => entry,
            Err(KvError::Flash(e)) => return Err(KvError::Flash(e)),
            Err(e) => {
                error!(
                    key = %String::from_utf8_lossy(&descriptor.key),
                    address,
                    error = %e,
                    "no intact copy left, entry lost"
                );
                if live {
                    self.sectors.mark_stale(address, descriptor.size);
                }
                if self.directory.remove_address(hash, address) == 0 {
                    self.directory.remove(hash);
                }
                return Ok(());
            }
        };

        // Never place two copies of one entry in the same sector
        let exclude: Vec<u32> = descriptor
            .addresses
            .iter()
            .map(|&a| self.sectors.sector_of(a))
            .collect();

        let bytes = encode(&entry, self.config.checksum.as_ref(), self.geometry.alignment);
        let destination = self.find_space(bytes.len() as u32, &exclude, true)?;
        let new_address = self.append(destination, &bytes, live)?;

        if live {
            self.sectors.mark_stale(address, descriptor.size);
        }
        self.directory.replace_address(hash, address, new_address);

        debug!(from = address, to = new_address, "relocated entry");
        Ok(())
    }

    /// Read the copy at `address`, falling back to redundant copies
    fn read_for_relocation(&mut self, descriptor: &KeyDescriptor, address: u32) -> Result<Entry> {
        let failure = match self.read_copy(descriptor, address) {
            Ok(entry) => return Ok(entry),
            Err(KvError::Flash(e)) => return Err(KvError::Flash(e)),
            Err(e) => e,
        };

        for &other in descriptor.addresses.iter().filter(|&&a| a != address) {
            if let Ok(entry) = self.read_copy(descriptor, other) {
                warn!(address, from = other, "restoring corrupt copy from redundant copy");
                return Ok(entry);
            }
        }

        Err(failure)
    }

    /// Erase the victim and persist its new erase count
    fn erase_victim(&mut self, victim: u32) -> Result<()> {
        if let Err(e) = self.flash.erase(victim) {
            error!(sector = victim, error = %e, "erase failed, marking sector corrupt");
            self.sectors.mark_corrupt(victim);
            return Err(e.into());
        }

        self.sectors.reset_erased(victim);
        self.directory.clear_shadow(victim);
        self.prepare_sector(victim)?;

        info!(
            sector = victim,
            erase_count = self.sectors.get(victim).map(|s| s.erase_count).unwrap_or(0),
            "reclaimed sector"
        );
        Ok(())
    }
}
