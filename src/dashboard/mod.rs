//! Read-only reporting over metrics, health and alerts.
//!
//! Nothing here mutates state; every call takes a fresh look at the
//! underlying components.

pub mod report;

use std::sync::Arc;

use serde::Serialize;

use crate::alerting::{Alert, AlertFilter, AlertingManager, Severity};
use crate::clock::SharedClock;
use crate::health::{HealthChecker, ServiceHealth};
use crate::metrics::{AggregatedStats, ArchiveAttemptRecord, MetricsRegistry};
use crate::observability::SpanLog;

pub use report::{format_report_as_text, MonitoringReport, ReportPeriod, ReportSummary};

const DAY_MS: u64 = 86_400_000;
const RECENT_ARCHIVES: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemActivity {
    pub recorded_spans: usize,
    pub pending_operations: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardData {
    pub timestamp: u64,
    pub services: Vec<ServiceHealth>,
    pub recent_archives: Vec<ArchiveAttemptRecord>,
    pub alerts: Vec<Alert>,
    pub stats: AggregatedStats,
    pub system_health: SystemActivity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuickStatusLevel {
    Ok,
    Degraded,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuickStatus {
    pub status: QuickStatusLevel,
    pub message: String,
    pub details: Vec<String>,
}

pub struct Dashboard {
    metrics: Arc<MetricsRegistry>,
    health: Arc<HealthChecker>,
    alerting: Arc<AlertingManager>,
    spans: SpanLog,
    clock: SharedClock,
}

impl std::fmt::Debug for Dashboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dashboard").field("spans", &self.spans).finish()
    }
}

impl Dashboard {
    pub fn new(
        metrics: Arc<MetricsRegistry>,
        health: Arc<HealthChecker>,
        alerting: Arc<AlertingManager>,
        spans: SpanLog,
        clock: SharedClock,
    ) -> Self {
        Self {
            metrics,
            health,
            alerting,
            spans,
            clock,
        }
    }

    pub fn dashboard_data(&self) -> DashboardData {
        DashboardData {
            timestamp: self.clock.now_millis(),
            services: self.health.get_all_health(),
            recent_archives: self.metrics.get_recent_archives(RECENT_ARCHIVES),
            alerts: self.alerting.get_active_alerts(),
            stats: self.metrics.get_aggregated_stats(DAY_MS),
            system_health: SystemActivity {
                recorded_spans: self.spans.len(),
                pending_operations: self.metrics.active_operations(),
            },
        }
    }

    /// Report over the last `period_ms`.
    pub fn generate_report(&self, period_ms: u64) -> MonitoringReport {
        let now = self.clock.now_millis();
        let alerts = self.alerting.get_alerts(&AlertFilter {
            since: Some(now.saturating_sub(period_ms)),
            ..AlertFilter::default()
        });
        report::build(
            now,
            self.metrics.get_aggregated_stats(period_ms),
            self.metrics.get_snapshot(),
            self.health.get_all_health(),
            alerts,
        )
    }

    /// One-line verdict for status bars and periodic logs.
    pub fn quick_status(&self) -> QuickStatus {
        let system = self.health.get_system_health();
        let active = self.alerting.get_active_alerts();
        let snapshot = self.metrics.get_snapshot();

        let mut status = QuickStatusLevel::Ok;
        let mut message = "All systems operational".to_string();
        let mut details = Vec::new();

        let critical: Vec<&Alert> = active.iter().filter(|a| a.severity == Severity::Critical).collect();
        if !critical.is_empty() {
            status = QuickStatusLevel::Error;
            message = format!("{} critical alert(s)", critical.len());
            details.extend(critical.iter().map(|a| a.message.clone()));
        } else if !active.is_empty() {
            status = QuickStatusLevel::Degraded;
            message = format!("{} active alert(s)", active.len());
        }

        if system.unhealthy_count > 0 {
            if status != QuickStatusLevel::Error {
                status = QuickStatusLevel::Degraded;
                message = format!("{} service(s) unhealthy", system.unhealthy_count);
            }
            let known = system.healthy_count + system.degraded_count + system.unhealthy_count;
            details.push(format!("Unhealthy services: {}/{}", system.unhealthy_count, known));
        }

        if snapshot.archive_attempts > 0 {
            let rate = format!("Success rate: {:.1}%", snapshot.success_rate * 100.0);
            if snapshot.success_rate < 0.5 {
                if status != QuickStatusLevel::Error {
                    status = QuickStatusLevel::Error;
                    message = "High failure rate".to_string();
                }
                details.push(rate);
            } else if snapshot.success_rate < 0.8 {
                if status == QuickStatusLevel::Ok {
                    status = QuickStatusLevel::Degraded;
                    message = "Reduced success rate".to_string();
                }
                details.push(rate);
            }
        }

        QuickStatus {
            status,
            message,
            details,
        }
    }

    /// Dashboard, 24h report, metrics, alerts and traces as one JSON document.
    pub fn export_all(&self) -> Result<String, serde_json::Error> {
        let export = serde_json::json!({
            "dashboard": self.dashboard_data(),
            "report": self.generate_report(DAY_MS),
            "metrics": self.metrics.export_value(),
            "alerts": self.alerting.export_value(),
            "traces": self.spans.export_value(),
        });
        serde_json::to_string_pretty(&export)
    }
}
