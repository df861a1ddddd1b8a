//! Metrics module
//!
//! Prometheus counters and histograms for the chunk relay.

pub mod server;

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    HistogramVec,
};

lazy_static! {
    // Chunk metrics
    pub static ref CHUNKS_TOTAL: CounterVec = register_counter_vec!(
        "chunk_relay_chunks_total",
        "Chunk upload requests by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref CHUNK_BYTES_TOTAL: Counter = register_counter!(
        "chunk_relay_forwarded_bytes_total",
        "Total chunk bytes forwarded upstream"
    ).unwrap();

    pub static ref CHUNK_DURATION: HistogramVec = register_histogram_vec!(
        "chunk_relay_chunk_duration_seconds",
        "End-to-end chunk relay duration in seconds",
        &["status"],
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    ).unwrap();

    // Upstream metrics
    pub static ref UPSTREAM_RETRIES: Counter = register_counter!(
        "chunk_relay_upstream_retries_total",
        "Forwarding attempts repeated after a transient transport failure"
    ).unwrap();

    // Buffer pool metrics
    pub static ref BUFFER_POOL_ACQUIRES: CounterVec = register_counter_vec!(
        "chunk_relay_buffer_pool_acquires_total",
        "Chunk buffer acquisitions by result",
        &["result"]  // "hit" or "miss"
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "chunk_relay_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record a chunk forwarded successfully
pub fn record_chunk_success(bytes: u64, duration_secs: f64) {
    CHUNKS_TOTAL.with_label_values(&["success"]).inc();
    CHUNK_BYTES_TOTAL.inc_by(bytes as f64);
    CHUNK_DURATION
        .with_label_values(&["success"])
        .observe(duration_secs);
}

/// Record a failed chunk, labelled with the error kind
pub fn record_chunk_failure(kind: &str, duration_secs: f64) {
    CHUNKS_TOTAL.with_label_values(&["failure"]).inc();
    CHUNK_DURATION
        .with_label_values(&["failure"])
        .observe(duration_secs);
    record_error(kind);
}

/// Record a retried upstream attempt
pub fn record_upstream_retry() {
    UPSTREAM_RETRIES.inc();
}

/// Record a buffer pool acquisition
pub fn record_buffer_pool(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    BUFFER_POOL_ACQUIRES.with_label_values(&[result]).inc();
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}
