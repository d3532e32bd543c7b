//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds in 0..=1, intervals > 0)
//! - Detect inconsistent combinations (healthy below degraded)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SentinelConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::SentinelConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &SentinelConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.archive.default_service.trim().is_empty() {
        errors.push(ValidationError::new("archive.default_service", "must not be empty"));
    }
    let mut seen = HashSet::new();
    for id in &config.archive.fallback_order {
        if id.trim().is_empty() {
            errors.push(ValidationError::new("archive.fallback_order", "contains an empty id"));
        } else if !seen.insert(id.as_str()) {
            errors.push(ValidationError::new(
                "archive.fallback_order",
                format!("duplicate service id '{}'", id),
            ));
        }
    }
    if config.archive.cache_max_entries == 0 {
        errors.push(ValidationError::new("archive.cache_max_entries", "must be > 0"));
    }

    let cb = &config.circuit_breaker;
    if cb.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be > 0"));
    }
    if cb.success_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.success_threshold", "must be > 0"));
    }

    if config.metrics.max_history == 0 {
        errors.push(ValidationError::new("metrics.max_history", "must be > 0"));
    }
    if config.metrics.max_samples == 0 {
        errors.push(ValidationError::new("metrics.max_samples", "must be > 0"));
    }

    let health = &config.health;
    if health.check_interval_ms == 0 {
        errors.push(ValidationError::new("health.check_interval_ms", "must be > 0"));
    }
    for (field, value) in [
        ("health.healthy_threshold", health.healthy_threshold),
        ("health.degraded_threshold", health.degraded_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            errors.push(ValidationError::new(field, "must be between 0 and 1"));
        }
    }
    if health.healthy_threshold < health.degraded_threshold {
        errors.push(ValidationError::new(
            "health.healthy_threshold",
            "must not be below degraded_threshold",
        ));
    }
    if health.latency_threshold_ms <= 0.0 {
        errors.push(ValidationError::new("health.latency_threshold_ms", "must be > 0"));
    }

    if config.alerting.check_interval_ms == 0 {
        errors.push(ValidationError::new("alerting.check_interval_ms", "must be > 0"));
    }
    if config.alerting.max_alerts == 0 {
        errors.push(ValidationError::new("alerting.max_alerts", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&SentinelConfig::default()).is_ok());
    }

    #[test]
    fn test_reports_every_error() {
        let mut config = SentinelConfig::default();
        config.archive.default_service = " ".into();
        config.archive.fallback_order = vec!["a".into(), "a".into()];
        config.health.healthy_threshold = 0.5;
        config.health.degraded_threshold = 0.8;
        config.circuit_breaker.success_threshold = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"archive.default_service"));
        assert!(fields.contains(&"archive.fallback_order"));
        assert!(fields.contains(&"health.healthy_threshold"));
        assert!(fields.contains(&"circuit_breaker.success_threshold"));
    }
}
