//! Records and reports produced by the metrics registry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One archive attempt against one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveAttemptRecord {
    pub service_id: String,
    pub url: String,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub from_cache: bool,
    /// When the attempt finished, in epoch milliseconds.
    pub timestamp_ms: u64,
}

impl ArchiveAttemptRecord {
    pub fn success(service_id: &str, url: &str, duration_ms: u64, timestamp_ms: u64) -> Self {
        Self {
            service_id: service_id.to_string(),
            url: url.to_string(),
            success: true,
            duration_ms,
            error_type: None,
            http_status: None,
            retry_count: 0,
            from_cache: false,
            timestamp_ms,
        }
    }

    pub fn failure(
        service_id: &str,
        url: &str,
        error_type: &str,
        duration_ms: u64,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            success: false,
            error_type: Some(error_type.to_string()),
            ..Self::success(service_id, url, duration_ms, timestamp_ms)
        }
    }

    pub fn cached(mut self) -> Self {
        self.from_cache = true;
        self
    }

    pub fn with_http_status(mut self, status: Option<u16>) -> Self {
        self.http_status = status;
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// Point-in-time view of the global counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub archive_attempts: u64,
    pub archive_successes: u64,
    pub archive_failures: u64,
    /// successes / attempts, 0 when nothing was attempted.
    pub success_rate: f64,
    pub avg_duration: f64,
    pub p50_duration: f64,
    pub p95_duration: f64,
    pub p99_duration: f64,
    pub active_operations: i64,
    /// Failures keyed by `"{service}:{errorType}"`.
    pub error_breakdown: BTreeMap<String, u64>,
}

/// Bucket label for an aggregation period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsPeriod {
    Hour,
    Day,
    Week,
    Month,
}

impl StatsPeriod {
    pub fn for_period(period_ms: u64) -> Self {
        match period_ms {
            0..=3_600_000 => Self::Hour,
            3_600_001..=86_400_000 => Self::Day,
            86_400_001..=604_800_000 => Self::Week,
            _ => Self::Month,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBreakdown {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub avg_latency: f64,
}

/// History rolled up over a trailing period.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedStats {
    pub period: StatsPeriod,
    pub start_time: u64,
    pub end_time: u64,
    pub archive_attempts: u64,
    pub archive_successes: u64,
    pub archive_failures: u64,
    pub service_breakdown: BTreeMap<String, ServiceBreakdown>,
    /// Failures keyed by error type alone.
    pub error_breakdown: BTreeMap<String, u64>,
    pub unique_urls: usize,
}

/// Per-service (or global) figures over retained history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetrics {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub avg_duration: f64,
    /// Error types of the latest failures, oldest first, at most 10.
    pub recent_errors: Vec<String>,
}

impl ServiceMetrics {
    /// Success rate, or `None` when there is nothing to judge by.
    pub fn observed_success_rate(&self) -> Option<f64> {
        (self.attempts > 0).then_some(self.success_rate)
    }

    pub fn observed_avg_duration(&self) -> Option<f64> {
        (self.attempts > 0).then_some(self.avg_duration)
    }
}
