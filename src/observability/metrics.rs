//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guardian_guard_decisions_total` (counter): per pipeline, guard, outcome
//! - `guardian_pipeline_duration_seconds` (histogram): whole-run latency
//! - `guardian_rate_limited_total` (counter): by scope (tier / origin)
//! - `guardian_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `guardian_breaker_rejections_total` (counter): calls short-circuited
//! - `guardian_events_dropped_total` (counter): security events lost to backpressure
//!
//! Without an installed recorder every call is a no-op, so library users
//! and tests pay nothing.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_guard_decision(pipeline: &str, guard: &str, outcome: &'static str) {
    counter!(
        "guardian_guard_decisions_total",
        "pipeline" => pipeline.to_string(),
        "guard" => guard.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_pipeline(pipeline: &str, outcome: &'static str, start: Instant) {
    histogram!(
        "guardian_pipeline_duration_seconds",
        "pipeline" => pipeline.to_string(),
        "outcome" => outcome
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(scope: &'static str) {
    counter!("guardian_rate_limited_total", "scope" => scope).increment(1);
}

pub fn record_breaker_state(service: &str, state: u8) {
    gauge!("guardian_breaker_state", "service" => service.to_string()).set(state as f64);
}

pub fn record_breaker_rejection(service: &str) {
    counter!("guardian_breaker_rejections_total", "service" => service.to_string()).increment(1);
}

pub fn record_event_dropped() {
    counter!("guardian_events_dropped_total").increment(1);
}
