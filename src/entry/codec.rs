//! Entry codec
//!
//! Serializes one record into its padded on-flash form and parses it back.
//! Decoding never trusts a length field before checking it fits the
//! available bytes, and reports checksum mismatches as a recoverable
//! [`DecodeError`] so scanners can skip the entry and resynchronise.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use crate::checksum::{self, ChecksumAlgorithm};

use super::{header_size, Entry, EntryHeader, EntryKind, ENTRY_MAGIC, MAX_KEY_LEN};

/// Why a byte range is not a valid entry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated entry: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("bad entry magic: {0:#010x}")]
    BadMagic(u32),

    #[error("bad entry flags: {0:#04x}")]
    BadFlags(u8),

    #[error("implausible entry lengths: key {key_len}, value {value_len}")]
    BadLength { key_len: usize, value_len: usize },

    #[error("checksum mismatch: stored {stored:#x}, computed {computed:#x}")]
    ChecksumMismatch { stored: u64, computed: u64 },
}

impl DecodeError {
    /// The header was sane but the payload failed its checksum
    pub fn is_checksum_mismatch(&self) -> bool {
        matches!(self, DecodeError::ChecksumMismatch { .. })
    }
}

/// An entry together with its padded on-flash size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEntry {
    pub entry: Entry,
    pub size: usize,
}

/// Encode `entry` into its padded on-flash form
pub fn encode(entry: &Entry, checksum: &dyn ChecksumAlgorithm, alignment: u32) -> Vec<u8> {
    debug_assert!(!entry.key.is_empty() && entry.key.len() <= MAX_KEY_LEN);
    debug_assert!(entry.value.len() <= u16::MAX as usize);

    let width = checksum.width();
    let size = entry.size(width, alignment);
    let raw_len = header_size(width) + entry.key.len() + entry.value.len();

    let mut buf = BytesMut::with_capacity(size);
    buf.put_u32_le(ENTRY_MAGIC);
    buf.put_bytes(0, width); // checksum, filled below
    buf.put_u8(entry.key.len() as u8);
    buf.put_u16_le(entry.value.len() as u16);
    buf.put_u32_le(entry.transaction_id);
    buf.put_u8(entry.kind as u8);
    buf.put_slice(&entry.key);
    buf.put_slice(&entry.value);
    buf.put_bytes(0, size - raw_len);

    let sum = checksum::truncate(
        checksum.compute_parts(&[&buf[..4], &buf[4 + width..raw_len]]),
        width,
    );
    buf[4..4 + width].copy_from_slice(&sum.to_le_bytes()[..width]);

    buf.to_vec()
}

/// Parse and sanity-check an entry header at the start of `bytes`
///
/// `bytes` must extend to the end of the region the entry may occupy; an
/// entry claiming more room than that is rejected.
pub fn decode_header(
    bytes: &[u8],
    checksum_width: usize,
    alignment: u32,
) -> Result<EntryHeader, DecodeError> {
    let needed = header_size(checksum_width);
    if bytes.len() < needed {
        return Err(DecodeError::Truncated {
            needed,
            available: bytes.len(),
        });
    }

    let mut cursor = &bytes[..needed];
    let magic = cursor.get_u32_le();
    if magic != ENTRY_MAGIC {
        return Err(DecodeError::BadMagic(magic));
    }

    let mut stored = [0u8; 8];
    cursor.copy_to_slice(&mut stored[..checksum_width]);
    let key_len = cursor.get_u8();
    let value_len = cursor.get_u16_le();
    let transaction_id = cursor.get_u32_le();
    let flags = cursor.get_u8();

    let kind = EntryKind::from_flags(flags).ok_or(DecodeError::BadFlags(flags))?;

    if key_len == 0 || (kind == EntryKind::Tombstone && value_len != 0) {
        return Err(DecodeError::BadLength {
            key_len: key_len as usize,
            value_len: value_len as usize,
        });
    }

    let header = EntryHeader {
        checksum: u64::from_le_bytes(stored),
        key_len,
        value_len,
        transaction_id,
        kind,
    };

    let size = header.entry_size(checksum_width, alignment);
    if size > bytes.len() {
        return Err(DecodeError::Truncated {
            needed: size,
            available: bytes.len(),
        });
    }

    Ok(header)
}

/// Decode a full entry at the start of `bytes`, verifying its checksum
pub fn decode(
    bytes: &[u8],
    checksum: &dyn ChecksumAlgorithm,
    alignment: u32,
) -> Result<DecodedEntry, DecodeError> {
    let width = checksum.width();
    let header = decode_header(bytes, width, alignment)?;

    let body_start = header_size(width);
    let key_end = body_start + header.key_len as usize;
    let value_end = key_end + header.value_len as usize;

    let computed = checksum::truncate(
        checksum.compute_parts(&[&bytes[..4], &bytes[4 + width..value_end]]),
        width,
    );
    if computed != header.checksum {
        return Err(DecodeError::ChecksumMismatch {
            stored: header.checksum,
            computed,
        });
    }

    Ok(DecodedEntry {
        entry: Entry {
            kind: header.kind,
            transaction_id: header.transaction_id,
            key: bytes[body_start..key_end].to_vec(),
            value: bytes[key_end..value_end].to_vec(),
        },
        size: header.entry_size(width, alignment),
    })
}
