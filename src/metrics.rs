//! Metrics for observability.
//!
//! Exports Prometheus-compatible counters for:
//! - Schema probes
//! - Records delivered (entries and head updates)
//! - Reconnections and malformed records
//! - Terminate requests
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replicator_` and counters end in `_total`.
//! Per-stream metrics carry a `stream` label holding the base URL.
//!
//! Recording is a no-op unless the embedding application installs a
//! `metrics` recorder.

use metrics::counter;

/// Record a schema probe and its outcome.
pub fn record_schema_check(stream: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("replicator_schema_checks_total", "stream" => stream.to_string(), "status" => status)
        .increment(1);
}

/// Record one entry delivered to a sink (decoded or raw).
pub fn record_entry_delivered() {
    counter!("replicator_entries_total").increment(1);
}

/// Record one head update delivered to a sink.
pub fn record_head_update() {
    counter!("replicator_head_updates_total").increment(1);
}

/// Record a reconnection of the subscription loop.
pub fn record_reconnect(stream: &str) {
    counter!("replicator_reconnects_total", "stream" => stream.to_string()).increment(1);
}

/// Record a malformed record that aborted a connection.
pub fn record_malformed_chunk(stream: &str) {
    counter!("replicator_malformed_records_total", "stream" => stream.to_string()).increment(1);
}

/// Record a terminate request fired at the remote.
pub fn record_terminate_request(stream: &str) {
    counter!("replicator_terminate_requests_total", "stream" => stream.to_string()).increment(1);
}
