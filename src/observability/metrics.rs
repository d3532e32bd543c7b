//! Metrics exposition.
//!
//! # Responsibilities
//! - Mirror in-process measurements into the `metrics` facade
//! - Install the Prometheus exporter when enabled
//!
//! # Metrics
//! - `archive_attempts_total` (counter): attempts by service, outcome
//! - `archive_failures_total` (counter): failures by service, error type
//! - `archive_duration_ms` (histogram): attempt latency by service
//! - `archive_active_operations` (gauge): operations in flight
//! - `circuit_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `service_health` (gauge): 1=healthy, 0.5=degraded, 0=unhealthy, -1=unknown
//! - `alerts_triggered_total` (counter): by rule, severity
//!
//! # Design Decisions
//! - Without an installed recorder every call here is a no-op
//! - Label values are service ids and enum codes only (bounded cardinality)

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter. Must be called inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install Prometheus exporter"),
    }
}

pub fn record_archive_attempt(service: &str, success: bool, from_cache: bool, duration_ms: u64) {
    let outcome = if success { "success" } else { "failure" };
    ::metrics::counter!(
        "archive_attempts_total",
        "service" => service.to_string(),
        "outcome" => outcome,
        "cached" => if from_cache { "true" } else { "false" }
    )
    .increment(1);
    if success {
        ::metrics::counter!("archive_successes_total", "service" => service.to_string()).increment(1);
    }
    ::metrics::histogram!("archive_duration_ms", "service" => service.to_string())
        .record(duration_ms as f64);
}

pub fn record_archive_failure(service: &str, error_type: &str) {
    ::metrics::counter!(
        "archive_failures_total",
        "service" => service.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

pub fn record_active_operations(count: i64) {
    ::metrics::gauge!("archive_active_operations").set(count as f64);
}

pub fn record_breaker_state(service: &str, code: f64) {
    ::metrics::gauge!("circuit_breaker_state", "service" => service.to_string()).set(code);
}

pub fn record_service_health(service: &str, value: f64) {
    ::metrics::gauge!("service_health", "service" => service.to_string()).set(value);
}

pub fn record_alert_triggered(rule: &str, severity: &str) {
    ::metrics::counter!(
        "alerts_triggered_total",
        "rule" => rule.to_string(),
        "severity" => severity.to_string()
    )
    .increment(1);
}
