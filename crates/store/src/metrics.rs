//! Prometheus metrics for the block store

use lazy_static::lazy_static;
use prometheus::{opts, register_counter, register_gauge, Counter, Gauge};

lazy_static! {
    /// Cache hit counter
    pub static ref CACHE_HITS: Counter =
        register_counter!(opts!("peercache_store_hits_total", "Total cache hits")).unwrap();

    /// Cache miss counter
    pub static ref CACHE_MISSES: Counter =
        register_counter!(opts!("peercache_store_misses_total", "Total cache misses")).unwrap();

    /// Cache eviction counter
    pub static ref CACHE_EVICTIONS: Counter =
        register_counter!(opts!("peercache_store_evictions_total", "Total cache evictions")).unwrap();

    /// Bytes currently accounted to cached entries
    pub static ref CACHE_BYTES_USED: Gauge =
        register_gauge!(opts!("peercache_store_bytes_used", "Current cache size in bytes")).unwrap();

    /// Entries currently cached
    pub static ref CACHE_ENTRIES: Gauge =
        register_gauge!(opts!("peercache_store_entries", "Current cache entry count")).unwrap();
}
