//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): completed requests by method, status, outcome
//! - `gateway_request_duration_seconds` (histogram): time spent inside the gateway
//! - `gateway_admission_total` (counter): admission decisions
//! - `gateway_counter_store_failures_total` (counter): fail-open events by reason
//! - `gateway_events_published_total` (counter): telemetry events by topic
//! - `gateway_event_publish_failures_total` (counter): dropped/failed events
//!
//! # Design Decisions
//! - `metrics` facade; recording is a no-op until an exporter is installed
//! - Prometheus exporter serves its own HTTP listener

use std::net::SocketAddr;
use std::time::Duration;

use ::metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter. Must run inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, outcome: &'static str, elapsed: Duration) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "outcome" => outcome).record(elapsed.as_secs_f64());
}

pub fn record_admission(decision: &'static str) {
    counter!("gateway_admission_total", "decision" => decision).increment(1);
}

pub fn record_counter_store_failure(reason: &'static str) {
    counter!("gateway_counter_store_failures_total", "reason" => reason).increment(1);
}

pub fn record_event_published(topic: &str) {
    counter!("gateway_events_published_total", "topic" => topic.to_string()).increment(1);
}

pub fn record_event_publish_failure(topic: &str, reason: &'static str) {
    counter!(
        "gateway_event_publish_failures_total",
        "topic" => topic.to_string(),
        "reason" => reason
    )
    .increment(1);
}
