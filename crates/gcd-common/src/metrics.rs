//! Metrics for adapter calls
//!
//! Recorded through the `metrics` facade; installing an exporter is left to the host.

#![allow(clippy::cast_precision_loss)]

use metrics::{counter, gauge, histogram};

/// Record an adapter method call and its outcome
pub fn record_adapter_call(method: &str, outcome: &str) {
    counter!("gcd_adapter_calls_total",
        "method" => method.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record adapter method latency
pub fn record_adapter_latency(method: &str, latency_ms: f64) {
    histogram!("gcd_adapter_duration_ms", "method" => method.to_string()).record(latency_ms);
}

/// Record entities persisted or deleted in one call
pub fn record_entities_written(kind: &str, count: u64) {
    counter!("gcd_entities_written_total", "kind" => kind.to_string()).increment(count);
}

/// Record entities returned by a query
pub fn record_entities_read(kind: &str, count: u64) {
    counter!("gcd_entities_read_total", "kind" => kind.to_string()).increment(count);
}

/// Update the registered datastores gauge
pub fn set_registered_datastores(count: usize) {
    gauge!("gcd_registered_datastores").set(count as f64);
}
