//! Flash Partition Module
//!
//! Abstract erase-unit-addressable storage consumed by the store.
//!
//! ## Responsibilities
//! - Declare partition geometry (sector size/count, alignment, base address)
//! - Read arbitrary byte ranges
//! - Program aligned byte ranges with NOR-flash semantics
//! - Erase whole sectors back to `0xFF`
//!
//! ## Write-Once Contract
//! ```text
//!   erased byte   1111_1111
//!   program 0xA5  1010_0101   ok: only clears bits
//!   program 0xFF  1111_1111   rejected: would set bits 1, 3, 4, 6 again
//! ```
//! Every implementation must reject a write that would set a bit which is
//! currently cleared. A sector can only be re-programmed after `erase()`.
//! Addresses are byte offsets relative to the start of the partition.

pub mod file;
pub mod memory;

use serde::{Deserialize, Serialize};

pub use crate::error::FlashError;
pub use file::{FileFlash, PartitionDescriptor};
pub use memory::MemoryFlash;

/// Value of every byte after an erase
pub const ERASED_BYTE: u8 = 0xFF;

/// Static layout of a flash partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    /// Absolute address of the partition on the device (informational)
    pub base_address: u32,
    /// Size of one erase unit in bytes
    pub sector_size: u32,
    /// Number of sectors in the partition
    pub sector_count: u32,
    /// Program granularity in bytes (power of two)
    pub alignment: u32,
}

impl Geometry {
    /// Create a geometry with a base address of zero
    pub fn new(sector_size: u32, sector_count: u32, alignment: u32) -> Self {
        Self {
            base_address: 0,
            sector_size,
            sector_count,
            alignment,
        }
    }

    /// Total partition size in bytes
    pub fn partition_size(&self) -> u64 {
        self.sector_size as u64 * self.sector_count as u64
    }

    /// Partition-relative address of the first byte of `sector`
    pub fn sector_address(&self, sector: u32) -> u32 {
        sector * self.sector_size
    }

    /// Sector containing `address`
    pub fn sector_of(&self, address: u32) -> u32 {
        address / self.sector_size
    }

    /// Round `len` up to the program granularity
    pub fn align_up(&self, len: usize) -> usize {
        let alignment = self.alignment.max(1) as usize;
        len.div_ceil(alignment) * alignment
    }

    /// Check the geometry is internally consistent
    pub fn is_valid(&self) -> bool {
        self.sector_count > 0
            && self.sector_size > 0
            && self.alignment > 0
            && self.alignment.is_power_of_two()
            && self.sector_size % self.alignment == 0
            && self.partition_size() <= u32::MAX as u64
    }

    /// Range check shared by all operations
    pub fn check_range(&self, address: u32, len: usize) -> Result<(), FlashError> {
        let end = address as u64 + len as u64;
        if end > self.partition_size() {
            return Err(FlashError::OutOfRange { address, len });
        }
        Ok(())
    }

    /// Range and alignment check for program operations
    pub fn check_write(&self, address: u32, len: usize) -> Result<(), FlashError> {
        self.check_range(address, len)?;
        let alignment = self.alignment as usize;
        if address as usize % alignment != 0 || len % alignment != 0 {
            return Err(FlashError::Misaligned {
                address,
                len,
                alignment,
            });
        }
        Ok(())
    }
}

/// Storage interface consumed by the store
///
/// All operations are synchronous. Timeouts and retries, if any, belong
/// to the implementation.
pub trait FlashPartition {
    /// Geometry of this partition; must not change while attached
    fn geometry(&self) -> Geometry;

    /// Read `buf.len()` bytes starting at `address`
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Program `data` at `address`
    ///
    /// Fails with `Misaligned`, `OutOfRange`, or `ProgramConflict` (if any
    /// bit would go from 0 to 1).
    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Reset every byte of `sector` to [`ERASED_BYTE`]
    fn erase(&mut self, sector: u32) -> Result<(), FlashError>;

    /// Read into a freshly allocated buffer
    fn read_vec(&mut self, address: u32, len: usize) -> Result<Vec<u8>, FlashError> {
        let mut buf = vec![0u8; len];
        self.read(address, &mut buf)?;
        Ok(buf)
    }

    /// Read a whole sector
    fn read_sector(&mut self, sector: u32) -> Result<Vec<u8>, FlashError> {
        let geometry = self.geometry();
        if sector >= geometry.sector_count {
            return Err(FlashError::InvalidSector(sector));
        }
        self.read_vec(
            geometry.sector_address(sector),
            geometry.sector_size as usize,
        )
    }
}

impl<F: FlashPartition + ?Sized> FlashPartition for &mut F {
    fn geometry(&self) -> Geometry {
        (**self).geometry()
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        (**self).read(address, buf)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        (**self).write(address, data)
    }

    fn erase(&mut self, sector: u32) -> Result<(), FlashError> {
        (**self).erase(sector)
    }
}

impl<F: FlashPartition + ?Sized> FlashPartition for Box<F> {
    fn geometry(&self) -> Geometry {
        (**self).geometry()
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        (**self).read(address, buf)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        (**self).write(address, data)
    }

    fn erase(&mut self, sector: u32) -> Result<(), FlashError> {
        (**self).erase(sector)
    }
}

/// True if every byte is in the erased state
pub fn is_erased(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == ERASED_BYTE)
}

/// Apply NOR program semantics of `src` onto `dst`
///
/// Checks the whole range before touching `dst`, so a rejected write
/// leaves the destination unchanged.
pub(crate) fn program(dst: &mut [u8], src: &[u8], address: u32) -> Result<(), FlashError> {
    debug_assert_eq!(dst.len(), src.len());

    if let Some(offset) = dst
        .iter()
        .zip(src)
        .position(|(&current, &new)| new & !current != 0)
    {
        return Err(FlashError::ProgramConflict {
            address: address + offset as u32,
        });
    }

    dst.copy_from_slice(src);
    Ok(())
}
