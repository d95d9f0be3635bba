//! Prometheus metrics for the fetch path

use lazy_static::lazy_static;
use prometheus::{
    opts, register_counter, register_histogram, Counter, Histogram,
};

lazy_static! {
    /// Successful upstream fetches (peer or origin)
    pub static ref UPSTREAM_FETCHES: Counter =
        register_counter!(opts!("peercache_upstream_fetches_total", "Total upstream fetches")).unwrap();

    /// Candidate attempts that failed or timed out
    pub static ref UPSTREAM_FAILURES: Counter =
        register_counter!(opts!("peercache_upstream_failures_total", "Total failed candidate attempts")).unwrap();

    /// Upstream fetch latency
    pub static ref UPSTREAM_FETCH_LATENCY: Histogram =
        register_histogram!("peercache_upstream_fetch_latency_seconds", "Upstream fetch latency in seconds").unwrap();

    /// Prefetch tasks dropped because the queue was full
    pub static ref PREFETCH_DROPPED: Counter =
        register_counter!(opts!("peercache_prefetch_dropped_total", "Prefetch tasks dropped on full queue")).unwrap();

    /// Prefetch tasks executed by the worker pool
    pub static ref PREFETCH_EXECUTED: Counter =
        register_counter!(opts!("peercache_prefetch_executed_total", "Prefetch tasks executed")).unwrap();
}
