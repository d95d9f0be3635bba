//! Prometheus metrics for the serving endpoint

use lazy_static::lazy_static;
use prometheus::{opts, register_counter, register_histogram, Counter, Histogram};

lazy_static! {
    /// Bytes served to clients and peers
    pub static ref BYTES_SERVED: Counter =
        register_counter!(opts!("peercache_bytes_served_total", "Total bytes served")).unwrap();

    /// Read requests received
    pub static ref READ_REQUESTS: Counter =
        register_counter!(opts!("peercache_read_requests_total", "Total read requests")).unwrap();

    /// Requests rejected for a bad or missing credential
    pub static ref UNAUTHORIZED_REQUESTS: Counter =
        register_counter!(opts!("peercache_unauthorized_requests_total", "Requests rejected as unauthorized")).unwrap();

    /// End-to-end read latency
    pub static ref READ_LATENCY: Histogram =
        register_histogram!("peercache_read_latency_seconds", "Read request latency in seconds").unwrap();
}
