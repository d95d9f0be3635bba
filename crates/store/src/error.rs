//! Error types for the block store

use std::io;
use thiserror::Error;

/// Block store error type
#[derive(Debug, Error)]
pub enum StoreError {
    /// A single entry is larger than the whole byte bound
    #[error("entry of {size} bytes exceeds cache capacity of {capacity} bytes")]
    OversizedEntry { size: u64, capacity: u64 },

    /// Configuration error
    #[error("store configuration error: {0}")]
    Config(String),

    /// Underlying storage is unavailable
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for block store operations
pub type Result<T> = std::result::Result<T, StoreError>;
