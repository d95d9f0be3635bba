//! Bounded on-disk block store
//!
//! Caches blob blocks under a media root with:
//! - Dual bounds (total bytes and entry count), enforced on admission
//! - Lazy LRU eviction across hash-partitioned shards
//! - Best-effort recovery of surviving entries at startup

pub mod error;
pub mod metrics;
mod store;

pub use error::{Result, StoreError};
pub use store::{BlockStore, StoreConfig, StoreStats};
