//! Metrics collection and exposition.
//!
//! # Metrics
//! - `kiosk_decode_total` (counter): decode attempts by outcome and stage
//! - `kiosk_rate_limited_total` (counter): denials by action
//! - `kiosk_limiter_store_failures_total` (counter): fail-secure denials
//! - `kiosk_operations_total` (counter): asset operations by kind, outcome
//! - `kiosk_operation_duration_seconds` (histogram): operation latency
//! - `kiosk_remote_calls_total` (counter): remote API calls by endpoint, outcome
//! - `kiosk_audit_degraded_total` (counter): audit writes that fell back to logs

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and bind the scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a decode attempt outcome. `stage` is the preprocessing stage that
/// produced the result, when there is one.
pub fn record_decode(outcome: &'static str, stage: Option<usize>) {
    let stage_label = stage.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string());
    metrics::counter!("kiosk_decode_total", "outcome" => outcome, "stage" => stage_label)
        .increment(1);
}

/// Record a rate-limit denial.
pub fn record_rate_limited(action: &'static str) {
    metrics::counter!("kiosk_rate_limited_total", "action" => action).increment(1);
}

/// Record a counter-store failure that was converted into a denial.
pub fn record_limiter_store_failure() {
    metrics::counter!("kiosk_limiter_store_failures_total").increment(1);
}

/// Record an asset operation outcome with latency.
pub fn record_operation(operation: &'static str, outcome: &'static str, start: Instant) {
    metrics::counter!("kiosk_operations_total", "operation" => operation, "outcome" => outcome)
        .increment(1);
    metrics::histogram!("kiosk_operation_duration_seconds", "operation" => operation)
        .record(start.elapsed().as_secs_f64());
}

/// Record a remote inventory call.
pub fn record_remote_call(endpoint: &'static str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    metrics::counter!("kiosk_remote_calls_total", "endpoint" => endpoint, "outcome" => outcome)
        .increment(1);
}

/// Record an audit write that degraded to a diagnostic log line.
pub fn record_audit_degraded() {
    metrics::counter!("kiosk_audit_degraded_total").increment(1);
}
