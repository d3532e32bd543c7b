//! Archive metrics registry.
//!
//! # Responsibilities
//! - Count attempts, successes and failures (global and per error type)
//! - Track attempt latency and operations in flight
//! - Keep a bounded attempt history for windowed queries
//!
//! Every recorded attempt is also mirrored into the `metrics` facade.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use serde::Serialize;

use crate::clock::SharedClock;
use crate::config::MetricsConfig;
use crate::metrics::primitives::{Counter, Gauge, Timer};
use crate::metrics::types::{
    AggregatedStats, ArchiveAttemptRecord, MetricsSnapshot, ServiceBreakdown, ServiceMetrics,
    StatsPeriod,
};
use crate::observability::metrics;

const RECENT_ERRORS: usize = 10;
const HOUR_MS: u64 = 3_600_000;
const DAY_MS: u64 = 86_400_000;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricsExport {
    snapshot: MetricsSnapshot,
    recent_archives: Vec<ArchiveAttemptRecord>,
    hourly_stats: AggregatedStats,
    daily_stats: AggregatedStats,
}

pub struct MetricsRegistry {
    config: MetricsConfig,
    clock: SharedClock,
    attempts: Counter,
    successes: Counter,
    failures: Counter,
    duration: Timer,
    active: Gauge,
    service_errors: DashMap<String, Counter>,
    history: Mutex<VecDeque<ArchiveAttemptRecord>>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("config", &self.config)
            .field("attempts", &self.attempts.get())
            .field("active", &self.active.get())
            .finish()
    }
}

/// Marks one operation as in flight until dropped.
#[must_use = "the operation ends when the guard is dropped"]
pub struct OperationGuard<'a> {
    registry: &'a MetricsRegistry,
}

impl OperationGuard<'_> {
    pub fn end(self) {}
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.registry.end_operation();
    }
}

impl MetricsRegistry {
    pub fn new(config: MetricsConfig, clock: SharedClock) -> Self {
        Self {
            attempts: Counter::new("archive_attempts_total", clock.clone()),
            successes: Counter::new("archive_successes_total", clock.clone()),
            failures: Counter::new("archive_failures_total", clock.clone()),
            duration: Timer::new("archive_duration_ms", config.max_samples, clock.clone()),
            active: Gauge::new(),
            service_errors: DashMap::new(),
            history: Mutex::new(VecDeque::new()),
            config,
            clock,
        }
    }

    pub fn record_archive(&self, record: ArchiveAttemptRecord) {
        self.attempts.inc();
        if record.success {
            self.successes.inc();
        } else {
            self.failures.inc();
            let error_type = record.error_type.as_deref().unwrap_or("unknown");
            let key = format!("{}:{}", record.service_id, error_type);
            let name = format!("errors_{key}");
            self.service_errors
                .entry(key)
                .or_insert_with(|| Counter::new(name, self.clock.clone()))
                .inc();
            metrics::record_archive_failure(&record.service_id, error_type);
        }
        self.duration.observe(record.duration_ms);
        metrics::record_archive_attempt(
            &record.service_id,
            record.success,
            record.from_cache,
            record.duration_ms,
        );

        let mut history = self.lock_history();
        history.push_back(record);
        while history.len() > self.config.max_history {
            history.pop_front();
        }
    }

    /// Count an operation as in flight until the returned guard drops.
    pub fn start_operation(&self) -> OperationGuard<'_> {
        metrics::record_active_operations(self.active.inc());
        OperationGuard { registry: self }
    }

    /// Paired with [`start_operation`](Self::start_operation); the guard calls this.
    pub fn end_operation(&self) {
        metrics::record_active_operations(self.active.dec());
    }

    pub fn active_operations(&self) -> i64 {
        self.active.get()
    }

    /// A standalone timer sharing this registry's clock and sample cap.
    pub fn create_timer(&self, name: &str) -> Timer {
        Timer::new(name, self.config.max_samples, self.clock.clone())
    }

    /// Global counters and latency percentiles over the retained samples.
    pub fn get_snapshot(&self) -> MetricsSnapshot {
        let attempts = self.attempts.get();
        let successes = self.successes.get();
        let error_breakdown = self
            .service_errors
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().get()))
            .collect();

        MetricsSnapshot {
            archive_attempts: attempts,
            archive_successes: successes,
            archive_failures: self.failures.get(),
            success_rate: if attempts > 0 {
                successes as f64 / attempts as f64
            } else {
                0.0
            },
            avg_duration: self.duration.mean(),
            p50_duration: self.duration.percentile(50.0),
            p95_duration: self.duration.percentile(95.0),
            p99_duration: self.duration.percentile(99.0),
            active_operations: self.active.get(),
            error_breakdown,
        }
    }

    /// Roll up attempts that finished within the last `period_ms`.
    pub fn get_aggregated_stats(&self, period_ms: u64) -> AggregatedStats {
        let end_time = self.clock.now_millis();
        let start_time = end_time.saturating_sub(period_ms);

        let mut stats = AggregatedStats {
            period: StatsPeriod::for_period(period_ms),
            start_time,
            end_time,
            archive_attempts: 0,
            archive_successes: 0,
            archive_failures: 0,
            service_breakdown: BTreeMap::new(),
            error_breakdown: BTreeMap::new(),
            unique_urls: 0,
        };
        let history = self.lock_history();
        let mut urls = BTreeSet::new();
        for record in history.iter().filter(|r| r.timestamp_ms >= start_time) {
            urls.insert(record.url.as_str());
            stats.archive_attempts += 1;

            let service = stats
                .service_breakdown
                .entry(record.service_id.clone())
                .or_insert_with(ServiceBreakdown::default);
            service.attempts += 1;
            if record.success {
                stats.archive_successes += 1;
                service.successes += 1;
            } else {
                stats.archive_failures += 1;
                service.failures += 1;
                let error_type = record.error_type.clone().unwrap_or_else(|| "unknown".to_string());
                *stats.error_breakdown.entry(error_type).or_insert(0) += 1;
            }
            // Running mean.
            service.avg_latency += (record.duration_ms as f64 - service.avg_latency) / service.attempts as f64;
        }
        stats.unique_urls = urls.len();
        stats
    }

    /// Figures for one service, over the last `window_ms` or all retained history.
    pub fn get_service_metrics(&self, service_id: &str, window_ms: Option<u64>) -> ServiceMetrics {
        self.summarize(window_ms, |r| r.service_id == service_id)
    }

    /// Figures across every service over the last `window_ms`.
    pub fn get_window_metrics(&self, window_ms: u64) -> ServiceMetrics {
        self.summarize(Some(window_ms), |_| true)
    }

    /// The last `limit` attempts, oldest first.
    pub fn get_recent_archives(&self, limit: usize) -> Vec<ArchiveAttemptRecord> {
        let history = self.lock_history();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.lock_history().len()
    }

    /// Snapshot, recent history and hourly/daily roll-ups as pretty JSON.
    pub fn export(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.export_value())
    }

    pub(crate) fn export_value(&self) -> serde_json::Value {
        let export = MetricsExport {
            snapshot: self.get_snapshot(),
            recent_archives: self.get_recent_archives(100),
            hourly_stats: self.get_aggregated_stats(HOUR_MS),
            daily_stats: self.get_aggregated_stats(DAY_MS),
        };
        serde_json::to_value(export).unwrap_or_default()
    }

    /// Drop every counter, sample and history entry.
    pub fn reset(&self) {
        self.attempts.reset();
        self.successes.reset();
        self.failures.reset();
        self.duration.reset();
        self.active.set(0);
        self.service_errors.clear();
        self.lock_history().clear();
        tracing::info!("Metrics reset");
    }

    fn summarize(&self, window_ms: Option<u64>, matches: impl Fn(&ArchiveAttemptRecord) -> bool) -> ServiceMetrics {
        let since = window_ms.map_or(0, |w| self.clock.now_millis().saturating_sub(w));
        let history = self.lock_history();

        let mut out = ServiceMetrics::default();
        let mut total_duration = 0u64;
        let mut errors = VecDeque::with_capacity(RECENT_ERRORS);
        for record in history.iter().filter(|r| r.timestamp_ms >= since && matches(r)) {
            out.attempts += 1;
            total_duration += record.duration_ms;
            if record.success {
                out.successes += 1;
            } else {
                out.failures += 1;
                if let Some(error_type) = &record.error_type {
                    if errors.len() == RECENT_ERRORS {
                        errors.pop_front();
                    }
                    errors.push_back(error_type.clone());
                }
            }
        }
        if out.attempts > 0 {
            out.success_rate = out.successes as f64 / out.attempts as f64;
            out.avg_duration = total_duration as f64 / out.attempts as f64;
        }
        out.recent_errors = errors.into();
        out
    }

    fn lock_history(&self) -> MutexGuard<'_, VecDeque<ArchiveAttemptRecord>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
