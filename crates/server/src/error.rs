//! Error types for the serving endpoint

use std::io;
use thiserror::Error;

/// Serving endpoint error type
#[derive(Debug, Error)]
pub enum ServerError {
    /// Listener setup or accept failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("server configuration error: {0}")]
    Config(String),
}

/// Result type alias for serving endpoint operations
pub type Result<T> = std::result::Result<T, ServerError>;
