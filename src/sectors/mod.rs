//! Sectors Module
//!
//! Per-sector bookkeeping for the store.
//!
//! ## Responsibilities
//! - Track state, write head, live/stale bytes, and erase count per sector
//! - Pick destinations for new entries (partially written first, then the
//!   least-worn empty sector)
//! - Pick garbage collection victims
//! - Encode the sector header that persists erase counts
//!
//! ## Sector Layout
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │ Sector Header (16 bytes, padded to alignment)      │
//! │   Magic "KVSH" (4) | Version (2) | Reserved (2)    │
//! │   EraseCount (4)   | CRC32 of previous 12 (4)      │
//! ├────────────────────────────────────────────────────┤
//! │ Entry │ Entry │ ... │ write head → erased (0xFF)    │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! ## State Machine
//! ```text
//! Empty ──first write──▶ Writable ──rollover──▶ Full
//!   ▲                                             │
//!   └────────erase──────── Erasing ◀──GC victim───┘
//!
//! any failed write/erase ──▶ Corrupt (absorbing)
//! ```

mod map;

use bytes::{Buf, BufMut, BytesMut};

pub use map::SectorMap;

// =============================================================================
// Sector Header
// =============================================================================

/// Magic identifying a formatted sector ("KVSH" on flash)
pub const SECTOR_MAGIC: u32 = 0x4853_564B;

/// Current sector header version
pub const SECTOR_VERSION: u16 = 1;

/// Unpadded sector header size
pub const SECTOR_HEADER_SIZE: usize = 16;

/// What the header area of a sector holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderState {
    /// Never written since the last erase
    Missing,

    /// Valid header carrying the erase count
    Valid,

    /// Programmed but unreadable (torn write, bit rot, foreign data)
    Invalid,
}

/// Encode a sector header padded to `padded_len` bytes
pub fn encode_header(erase_count: u32, padded_len: usize) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(padded_len);
    buf.put_u32_le(SECTOR_MAGIC);
    buf.put_u16_le(SECTOR_VERSION);
    buf.put_u16_le(0);
    buf.put_u32_le(erase_count);
    let crc = crc32fast::hash(&buf[..12]);
    buf.put_u32_le(crc);
    buf.put_bytes(0, padded_len.saturating_sub(SECTOR_HEADER_SIZE));
    buf.to_vec()
}

/// Decode a sector header, returning its state and erase count
pub fn decode_header(bytes: &[u8]) -> (HeaderState, u32) {
    if bytes.len() < SECTOR_HEADER_SIZE {
        return (HeaderState::Invalid, 0);
    }
    if crate::flash::is_erased(bytes) {
        return (HeaderState::Missing, 0);
    }

    let mut cursor = &bytes[..SECTOR_HEADER_SIZE];
    let magic = cursor.get_u32_le();
    let version = cursor.get_u16_le();
    let _reserved = cursor.get_u16_le();
    let erase_count = cursor.get_u32_le();
    let crc = cursor.get_u32_le();

    if magic != SECTOR_MAGIC
        || version != SECTOR_VERSION
        || crc != crc32fast::hash(&bytes[..12])
    {
        return (HeaderState::Invalid, 0);
    }

    (HeaderState::Valid, erase_count)
}

// =============================================================================
// Sector Descriptor
// =============================================================================

/// Lifecycle state of a sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorState {
    /// No entries; available for allocation
    Empty,

    /// Accepting appends at the write head
    Writable,

    /// No further appends until erased
    Full,

    /// Chosen as GC victim; live entries are being copied out
    Erasing,

    /// A write or erase failed; never allocated again
    Corrupt,
}

/// In-memory bookkeeping for one sector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorDescriptor {
    pub id: u32,
    pub state: SectorState,
    pub header: HeaderState,
    /// Offset within the sector of the next append
    pub write_head: u32,
    /// Bytes of entries that are the current copy of a live key
    pub live_bytes: u32,
    /// Bytes of superseded entries, tombstones, and corrupt regions
    pub stale_bytes: u32,
    pub erase_count: u32,
}

impl SectorDescriptor {
    /// Bytes still available for appends
    pub fn free_bytes(&self, sector_size: u32) -> u32 {
        sector_size.saturating_sub(self.write_head)
    }

    /// True if GC erasing this sector would gain anything
    pub fn is_reclaimable(&self) -> bool {
        self.stale_bytes > 0 || self.header != HeaderState::Valid
    }
}
