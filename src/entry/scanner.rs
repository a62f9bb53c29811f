//! Sector scanner
//!
//! Walks a sector image and produces a sequence of decoded entries and
//! corrupt regions. It only answers "which byte ranges hold valid
//! entries"; deciding what those entries mean is left to recovery.

use crate::checksum::ChecksumAlgorithm;
use crate::flash::is_erased;

use super::codec::{decode, decode_header, DecodeError};
use super::Entry;

/// One step of a sector scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanItem {
    /// A fully valid entry
    Entry {
        address: u32,
        entry: Entry,
        size: usize,
    },

    /// Bytes that are neither a valid entry nor erased space
    Corrupt {
        address: u32,
        len: usize,
        error: DecodeError,
    },
}

/// Iterator over the entries of one sector image
pub struct SectorScanner<'a> {
    /// Whole sector contents
    image: &'a [u8],
    /// Partition address of `image[0]`
    base_address: u32,
    /// Current offset within the image
    pos: usize,
    checksum: &'a dyn ChecksumAlgorithm,
    alignment: u32,
    /// Set once the rest of the image is known to be erased
    write_head: Option<usize>,
}

impl<'a> SectorScanner<'a> {
    /// Scan `image` starting at `data_start`
    ///
    /// `base_address` is the partition address of the first byte of the
    /// image; reported addresses are partition-relative.
    pub fn new(
        image: &'a [u8],
        base_address: u32,
        data_start: usize,
        checksum: &'a dyn ChecksumAlgorithm,
        alignment: u32,
    ) -> Self {
        Self {
            image,
            base_address,
            pos: data_start,
            checksum,
            alignment: alignment.max(1),
            write_head: None,
        }
    }

    /// Offset (within the sector) of the first aligned byte after which the
    /// sector is erased. Only meaningful once the iterator is exhausted.
    pub fn write_head(&self) -> usize {
        self.write_head.unwrap_or(self.pos)
    }

    /// Step forward from `from` to the next offset that is either the start
    /// of erased space or holds a plausible entry header
    fn resync(&self, from: usize) -> usize {
        let width = self.checksum.width();
        let step = self.alignment as usize;

        let mut pos = from;
        while pos < self.image.len() {
            let rest = &self.image[pos..];
            if is_erased(rest) || decode_header(rest, width, self.alignment).is_ok() {
                return pos;
            }
            pos += step;
        }
        self.image.len()
    }
}

impl Iterator for SectorScanner<'_> {
    type Item = ScanItem;

    fn next(&mut self) -> Option<Self::Item> {
        if self.write_head.is_some() {
            return None;
        }

        if self.pos >= self.image.len() || is_erased(&self.image[self.pos..]) {
            self.write_head = Some(self.pos.min(self.image.len()));
            return None;
        }

        let start = self.pos;
        let address = self.base_address + start as u32;

        match decode(&self.image[start..], self.checksum, self.alignment) {
            Ok(decoded) => {
                self.pos += decoded.size;
                Some(ScanItem::Entry {
                    address,
                    entry: decoded.entry,
                    size: decoded.size,
                })
            }
            Err(error) => {
                self.pos = self.resync(start + self.alignment as usize);
                Some(ScanItem::Corrupt {
                    address,
                    len: self.pos - start,
                    error,
                })
            }
        }
    }
}
