//! Error types for the fetch path
//!
//! `FetchError` is the terminal taxonomy surfaced to callers; it is
//! `Clone` because a single-flight result is shared verbatim with
//! every waiter of the in-flight token.

use thiserror::Error;

/// Fetch orchestrator error type
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Blob or range unknown to any reachable source
    #[error("blob or range not found at any reachable source")]
    NotFound,

    /// Every candidate failed or timed out; terminal for this request
    #[error("all candidate sources exhausted: {last_error}")]
    ExhaustedSources { last_error: String },

    /// Local fault outside the degrade-to-miss path
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for fetch operations
pub type Result<T> = std::result::Result<T, FetchError>;
