//! In-memory flash partition
//!
//! RAM-backed [`FlashPartition`] that enforces the write-once-per-erase
//! contract and supports fault injection, so recovery and error paths can
//! be exercised without hardware.

use super::{program, FlashError, FlashPartition, Geometry, ERASED_BYTE};

/// Injected failures, consumed as operations run
#[derive(Debug, Default, Clone)]
struct Faults {
    /// Fail this many upcoming reads
    reads: usize,
    /// Fail this many upcoming writes
    writes: usize,
    /// Fail this many upcoming erases
    erases: usize,
    /// Sectors whose writes and erases always fail
    bad_sectors: Vec<u32>,
    /// Program only this many bytes of the next write, then fail
    torn_write: Option<usize>,
}

/// Flash partition held entirely in memory
#[derive(Debug, Clone)]
pub struct MemoryFlash {
    geometry: Geometry,
    data: Vec<u8>,
    erase_counts: Vec<u32>,
    faults: Faults,
}

impl MemoryFlash {
    /// Create a fully erased partition
    ///
    /// Panics if the geometry is not valid; this type is meant for tests and
    /// host tooling where a bad geometry is a programming error.
    pub fn new(geometry: Geometry) -> Self {
        assert!(geometry.is_valid(), "invalid flash geometry: {:?}", geometry);

        Self {
            data: vec![ERASED_BYTE; geometry.partition_size() as usize],
            erase_counts: vec![0; geometry.sector_count as usize],
            geometry,
            faults: Faults::default(),
        }
    }

    /// Convenience constructor with a base address of zero
    pub fn with_sectors(sector_size: u32, sector_count: u32, alignment: u32) -> Self {
        Self::new(Geometry::new(sector_size, sector_count, alignment))
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Raw partition contents
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of times `sector` has been erased through this instance
    pub fn erase_count(&self, sector: u32) -> u32 {
        self.erase_counts[sector as usize]
    }

    /// Erase counts for every sector
    pub fn erase_counts(&self) -> &[u32] {
        &self.erase_counts
    }

    // =========================================================================
    // Fault Injection
    // =========================================================================

    /// XOR a byte in place, bypassing program semantics (bit rot)
    pub fn corrupt_byte(&mut self, address: u32, mask: u8) {
        self.data[address as usize] ^= mask;
    }

    /// Overwrite raw bytes, bypassing program semantics
    pub fn write_raw(&mut self, address: u32, bytes: &[u8]) {
        let start = address as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Fail the next `count` reads
    pub fn fail_next_reads(&mut self, count: usize) {
        self.faults.reads = count;
    }

    /// Fail the next `count` writes
    pub fn fail_next_writes(&mut self, count: usize) {
        self.faults.writes = count;
    }

    /// Fail the next `count` erases
    pub fn fail_next_erases(&mut self, count: usize) {
        self.faults.erases = count;
    }

    /// Make every write or erase touching `sector` fail
    pub fn mark_bad_sector(&mut self, sector: u32) {
        if !self.faults.bad_sectors.contains(&sector) {
            self.faults.bad_sectors.push(sector);
        }
    }

    /// Simulate power loss: the next write programs only `keep` bytes
    pub fn tear_next_write(&mut self, keep: usize) {
        self.faults.torn_write = Some(keep);
    }

    /// Drop all pending injected faults
    pub fn clear_faults(&mut self) {
        self.faults = Faults::default();
    }

    fn is_bad(&self, sector: u32) -> bool {
        self.faults.bad_sectors.contains(&sector)
    }
}

impl FlashPartition for MemoryFlash {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.geometry.check_range(address, buf.len())?;

        if self.faults.reads > 0 {
            self.faults.reads -= 1;
            return Err(FlashError::Device(format!(
                "injected read failure at {:#x}",
                address
            )));
        }

        let start = address as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        self.geometry.check_write(address, data.len())?;

        if data.is_empty() {
            return Ok(());
        }

        let first = self.geometry.sector_of(address);
        let last = self.geometry.sector_of(address + data.len() as u32 - 1);
        if (first..=last).any(|s| self.is_bad(s)) {
            return Err(FlashError::Device(format!(
                "write to bad sector at {:#x}",
                address
            )));
        }

        if self.faults.writes > 0 {
            self.faults.writes -= 1;
            return Err(FlashError::Device(format!(
                "injected write failure at {:#x}",
                address
            )));
        }

        let start = address as usize;
        let region = &mut self.data[start..start + data.len()];

        if let Some(keep) = self.faults.torn_write.take() {
            let keep = keep.min(data.len());
            program(&mut region[..keep], &data[..keep], address)?;
            return Err(FlashError::Device(format!(
                "power lost after {} of {} bytes at {:#x}",
                keep,
                data.len(),
                address
            )));
        }

        program(region, data, address)
    }

    fn erase(&mut self, sector: u32) -> Result<(), FlashError> {
        if sector >= self.geometry.sector_count {
            return Err(FlashError::InvalidSector(sector));
        }

        if self.is_bad(sector) {
            return Err(FlashError::Device(format!("erase of bad sector {}", sector)));
        }

        if self.faults.erases > 0 {
            self.faults.erases -= 1;
            return Err(FlashError::Device(format!(
                "injected erase failure on sector {}",
                sector
            )));
        }

        let start = self.geometry.sector_address(sector) as usize;
        let end = start + self.geometry.sector_size as usize;
        self.data[start..end].fill(ERASED_BYTE);
        self.erase_counts[sector as usize] += 1;
        Ok(())
    }
}
