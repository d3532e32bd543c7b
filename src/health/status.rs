//! Health status types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resilience::CircuitState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "HEALTHY",
            Self::Degraded => "DEGRADED",
            Self::Unhealthy => "UNHEALTHY",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Value exported on the `service_health` gauge.
    pub const fn gauge_value(&self) -> f64 {
        match self {
            Self::Healthy => 1.0,
            Self::Degraded => 0.5,
            Self::Unhealthy => 0.0,
            Self::Unknown => -1.0,
        }
    }

    pub const fn icon(&self) -> &'static str {
        match self {
            Self::Healthy => "✓",
            Self::Degraded => "⚠",
            Self::Unhealthy => "✗",
            Self::Unknown => "?",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest computed health of one service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub service_id: String,
    pub status: HealthStatus,
    /// Epoch millis of the computation; 0 until first computed.
    pub last_check: u64,
    pub success_rate: f64,
    pub avg_latency: f64,
    pub circuit_state: CircuitState,
    pub error_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ServiceHealth {
    /// Initial entry for a service nothing is known about yet.
    pub fn unknown(service_id: &str) -> Self {
        Self {
            service_id: service_id.to_string(),
            status: HealthStatus::Unknown,
            last_check: 0,
            success_rate: 1.0,
            avg_latency: 0.0,
            circuit_state: CircuitState::Closed,
            error_count: 0,
            message: None,
        }
    }
}

/// Roll-up over every known service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub healthy_count: usize,
    pub degraded_count: usize,
    pub unhealthy_count: usize,
    pub unknown_count: usize,
    pub last_check: u64,
}

impl SystemHealth {
    /// Reduce per-service statuses to one.
    ///
    /// No services at all is UNHEALTHY: with nothing to archive to, the
    /// system cannot do its job.
    pub fn rollup(statuses: &[HealthStatus], last_check: u64) -> Self {
        let count = |wanted: HealthStatus| statuses.iter().filter(|s| **s == wanted).count();
        let healthy_count = count(HealthStatus::Healthy);
        let degraded_count = count(HealthStatus::Degraded);
        let unhealthy_count = count(HealthStatus::Unhealthy);
        let unknown_count = count(HealthStatus::Unknown);

        let status = if unhealthy_count == statuses.len() {
            HealthStatus::Unhealthy
        } else if healthy_count == statuses.len() {
            HealthStatus::Healthy
        } else if unhealthy_count > 0 || degraded_count > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unknown
        };

        Self {
            status,
            healthy_count,
            degraded_count,
            unhealthy_count,
            unknown_count,
            last_check,
        }
    }
}
