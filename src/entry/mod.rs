//! Entry Module
//!
//! One serialized key-value record and the tools to read it back.
//!
//! ## Responsibilities
//! - Define the bit-exact on-flash record layout
//! - Encode records with checksum and alignment padding
//! - Decode records, validating header sanity before the checksum
//! - Scan a sector image into a sequence of entries and corrupt regions
//!
//! ## Entry Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Header (12 + W bytes, little-endian)                             │
//! │ ┌───────────┬────────────┬─────────┬─────────┬────────┬───────┐ │
//! │ │ Magic (4) │ Checksum(W)│ KeyLen 1│ ValLen 2│ TxId 4 │ Flags │ │
//! │ └───────────┴────────────┴─────────┴─────────┴────────┴───────┘ │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ Key (KeyLen) │ Value (ValLen) │ Zero padding to alignment        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//! W is the width of the configured checksum. The checksum covers the
//! header without the checksum field, then the key, then the value.

pub mod codec;
pub mod scanner;

pub use codec::{decode, decode_header, encode, DecodeError, DecodedEntry};
pub use scanner::{ScanItem, SectorScanner};

// =============================================================================
// Format Constants
// =============================================================================

/// Magic/version tag at the start of every entry ("VKS1" on flash)
pub const ENTRY_MAGIC: u32 = 0x3153_4B56;

/// Largest key the one-byte length field can describe
pub const MAX_KEY_LEN: usize = u8::MAX as usize;

/// Header bytes that do not depend on the checksum width
pub const FIXED_HEADER_SIZE: usize = 12;

/// Header size for a checksum of `checksum_width` bytes
pub const fn header_size(checksum_width: usize) -> usize {
    FIXED_HEADER_SIZE + checksum_width
}

/// Padded on-flash size of an entry
pub fn entry_size(checksum_width: usize, key_len: usize, value_len: usize, alignment: u32) -> usize {
    let raw = header_size(checksum_width) + key_len + value_len;
    let alignment = alignment.max(1) as usize;
    raw.div_ceil(alignment) * alignment
}

// =============================================================================
// Entry Types
// =============================================================================

/// What an entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryKind {
    /// A live value for the key
    Value = 0x01,

    /// The key was deleted; carries no value bytes
    Tombstone = 0x02,
}

impl EntryKind {
    pub fn from_flags(flags: u8) -> Option<Self> {
        match flags {
            0x01 => Some(Self::Value),
            0x02 => Some(Self::Tombstone),
            _ => None,
        }
    }
}

/// Fixed-size part of an entry, as read from flash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub checksum: u64,
    pub key_len: u8,
    pub value_len: u16,
    pub transaction_id: u32,
    pub kind: EntryKind,
}

impl EntryHeader {
    /// Padded size of the entry this header describes
    pub fn entry_size(&self, checksum_width: usize, alignment: u32) -> usize {
        entry_size(
            checksum_width,
            self.key_len as usize,
            self.value_len as usize,
            alignment,
        )
    }
}

/// A decoded (or to-be-encoded) record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub kind: EntryKind,
    pub transaction_id: u32,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Entry {
    /// Build a value entry
    pub fn value(transaction_id: u32, key: &[u8], value: &[u8]) -> Self {
        Self {
            kind: EntryKind::Value,
            transaction_id,
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    /// Build a tombstone entry
    pub fn tombstone(transaction_id: u32, key: &[u8]) -> Self {
        Self {
            kind: EntryKind::Tombstone,
            transaction_id,
            key: key.to_vec(),
            value: Vec::new(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.kind == EntryKind::Tombstone
    }

    /// Padded on-flash size
    pub fn size(&self, checksum_width: usize, alignment: u32) -> usize {
        entry_size(checksum_width, self.key.len(), self.value.len(), alignment)
    }
}
