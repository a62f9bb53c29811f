//! Error types for SectorKV
//!
//! Provides a unified error type for all store operations, plus the
//! error type reported by flash partition implementations.

use thiserror::Error;

/// Result type alias using KvError
pub type Result<T> = std::result::Result<T, KvError>;

/// Unified error type for SectorKV operations
#[derive(Debug, Error)]
pub enum KvError {
    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    NotFound,

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    /// A previously accepted entry no longer matches its checksum
    #[error("Data loss: entry at address {address:#x} failed checksum")]
    DataLoss { address: u32 },

    /// Recovered state that cannot be reconciled
    #[error("Store corruption detected: {0}")]
    Corrupt(String),

    // -------------------------------------------------------------------------
    // Capacity Errors
    // -------------------------------------------------------------------------
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    // -------------------------------------------------------------------------
    // Argument / Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Flash Errors
    // -------------------------------------------------------------------------
    #[error("Flash error: {0}")]
    Flash(#[from] FlashError),
}

/// Errors reported by a [`FlashPartition`](crate::flash::FlashPartition)
#[derive(Debug, Error)]
pub enum FlashError {
    #[error("Access out of range: address {address:#x}, length {len}")]
    OutOfRange { address: u32, len: usize },

    #[error("Misaligned access: address {address:#x}, length {len}, alignment {alignment}")]
    Misaligned {
        address: u32,
        len: usize,
        alignment: usize,
    },

    /// Attempt to set a bit that is already cleared (requires an erase first)
    #[error("Program conflict at address {address:#x}: bits can only be cleared before erase")]
    ProgramConflict { address: u32 },

    #[error("Invalid sector: {0}")]
    InvalidSector(u32),

    /// Driver-level failure (timeout, bus error, injected fault)
    #[error("Device error: {0}")]
    Device(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
