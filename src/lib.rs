//! # SectorKV
//!
//! A log-structured key-value store for raw erasable flash, with:
//! - Append-only entries with per-entry checksums
//! - Crash recovery by rescanning flash (no undo log)
//! - Inline, single-sector garbage collection
//! - Wear leveling through erase-count aware allocation
//! - Optional redundant copies of every entry
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Store                                │
//! │          get / put / delete / keys / collect_garbage         │
//! └───────────┬─────────────────────────────────┬───────────────┘
//!             │                                 │
//!             ▼                                 ▼
//!   ┌──────────────────┐              ┌──────────────────┐
//!   │   KeyDirectory   │              │    SectorMap     │
//!   │ hash → location  │              │ live/stale/wear  │
//!   └────────┬─────────┘              └────────┬─────────┘
//!            │                                 │
//!            └──────────────┬──────────────────┘
//!                           ▼
//!                  ┌──────────────────┐
//!                  │   Entry codec    │
//!                  │  + SectorScanner │
//!                  └────────┬─────────┘
//!                           ▼
//!                  ┌──────────────────┐
//!                  │ FlashPartition   │
//!                  │ read/write/erase │
//!                  └──────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod checksum;
pub mod config;
pub mod error;

pub mod directory;
pub mod entry;
pub mod flash;
pub mod sectors;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use checksum::{ChecksumAlgorithm, Crc32};
pub use config::StoreConfig;
pub use error::{FlashError, KvError, Result};
pub use flash::{FileFlash, FlashPartition, Geometry, MemoryFlash};
pub use store::{Keys, RecoveryReport, Store, StoreStats};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of SectorKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
