//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the sentinel.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the archive sentinel.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct SentinelConfig {
    /// Archive preferences (auto-archive, default service, fallback order).
    pub archive: ArchiveConfig,

    /// Per-service circuit breaker tuning.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Metrics retention.
    pub metrics: MetricsConfig,

    /// Health check settings.
    pub health: HealthConfig,

    /// Alert evaluation settings.
    pub alerting: AlertingConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Archive preferences. Read-only input owned by the host application.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Archive newly added documents automatically.
    pub auto_archive: bool,

    /// Service used for auto-archive.
    pub default_service: String,

    /// Preferred order when no explicit service is requested.
    pub fallback_order: Vec<String>,

    /// How long a successful archive link is reused for the same URL.
    pub cache_ttl_ms: u64,

    /// Maximum number of cached archive links.
    pub cache_max_entries: usize,

    /// Per-service adapter settings, keyed by service id.
    pub services: BTreeMap<String, ServiceSettings>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            auto_archive: true,
            default_service: "internetarchive".to_string(),
            fallback_order: vec![
                "internetarchive".to_string(),
                "archivetoday".to_string(),
                "arquivopt".to_string(),
                "permacc".to_string(),
                "ukwebarchive".to_string(),
            ],
            cache_ttl_ms: 3_600_000,
            cache_max_entries: 100,
            services: BTreeMap::new(),
        }
    }
}

impl ArchiveConfig {
    /// Settings for one service, falling back to defaults.
    pub fn service(&self, service_id: &str) -> ServiceSettings {
        self.services.get(service_id).cloned().unwrap_or_default()
    }
}

/// Adapter-facing settings for a single archive service.
///
/// The core only carries these through; retries are an adapter concern.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServiceSettings {
    /// Whether the service may be used at all.
    pub enabled: bool,

    /// Request timeout in milliseconds.
    pub timeout_ms: u64,

    /// Adapter-internal retry count.
    pub max_retries: u32,

    /// Adapter-internal delay between retries in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 120_000,
            max_retries: 3,
            retry_delay_ms: 5_000,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Counted failures before the breaker may open.
    pub failure_threshold: u32,

    /// Consecutive successes in half-open needed to close, and the
    /// maximum number of concurrent half-open trial calls.
    pub success_threshold: u32,

    /// Time after the last failure before a trial is allowed (ms).
    pub timeout_ms: u64,

    /// Minimum calls observed before the breaker may open.
    pub volume_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 60_000,
            volume_threshold: 10,
        }
    }
}

/// Metrics retention configuration.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Attempt records kept in history.
    pub max_history: usize,

    /// Raw samples kept per histogram for percentiles.
    pub max_samples: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_history: 5_000,
            max_samples: 10_000,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval between periodic checks (ms).
    pub check_interval_ms: u64,

    /// Success rate at or above which a service is healthy.
    pub healthy_threshold: f64,

    /// Success rate at or above which a service is degraded.
    pub degraded_threshold: f64,

    /// Average latency above which a service is degraded (ms).
    pub latency_threshold_ms: f64,

    /// Metrics window used for each computation (ms).
    pub window_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 300_000,
            healthy_threshold: 0.95,
            degraded_threshold: 0.7,
            latency_threshold_ms: 30_000.0,
            window_ms: 3_600_000,
        }
    }
}

/// Alerting configuration.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct AlertingConfig {
    /// Interval between rule evaluations (ms).
    pub check_interval_ms: u64,

    /// Alerts retained in the log.
    pub max_alerts: usize,

    /// Cooldown applied to rules that don't set one (ms).
    pub default_cooldown_ms: u64,

    /// Surface transient notifications for new alerts.
    pub enable_notifications: bool,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 60_000,
            max_alerts: 100,
            default_cooldown_ms: 300_000,
            enable_notifications: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the pretty format.
    pub json_logs: bool,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Prometheus endpoint bind address.
    pub metrics_address: String,

    /// Closed spans retained for trace export.
    pub max_spans: usize,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
            max_spans: 1_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = SentinelConfig::default();
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.volume_threshold, 10);
        assert_eq!(config.metrics.max_history, 5_000);
        assert_eq!(config.alerting.max_alerts, 100);
        assert_eq!(config.archive.default_service, "internetarchive");
        assert_eq!(config.archive.fallback_order.len(), 5);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: SentinelConfig = toml::from_str(
            r#"
            [archive]
            fallback_order = ["archivetoday"]

            [archive.services.permacc]
            enabled = false

            [health]
            healthy_threshold = 0.9
            "#,
        )
        .unwrap();

        assert_eq!(config.archive.fallback_order, vec!["archivetoday"]);
        assert!(config.archive.auto_archive);
        assert!(!config.archive.service("permacc").enabled);
        assert!(config.archive.service("internetarchive").enabled);
        assert_eq!(config.health.healthy_threshold, 0.9);
        assert_eq!(config.health.degraded_threshold, 0.7);
    }
}
