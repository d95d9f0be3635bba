//! Range-fetch orchestration
//!
//! Serves range reads against the block store, falling back through
//! the selector's candidates on a miss. Concurrent identical misses
//! collapse into one upstream fetch (single-flight), and completed
//! reads opportunistically warm the next block through a bounded
//! prefetch worker pool.

pub mod error;
pub mod metrics;
mod orchestrator;
mod source;

pub use error::{FetchError, Result};
pub use orchestrator::{BlobReader, FetchConfig, FetchOrchestrator};
pub use source::{HttpRangeSource, RangeSource, SourceError};
