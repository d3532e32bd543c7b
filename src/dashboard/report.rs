//! Periodic monitoring report.

use std::fmt::Write as _;

use serde::Serialize;

use crate::alerting::Alert;
use crate::health::{HealthStatus, ServiceHealth};
use crate::metrics::{AggregatedStats, MetricsSnapshot};

const RULE: &str = "════════════════════════════════════════════";
const MAX_LISTED_ALERTS: usize = 10;
/// Errors of one kind for one service before a recommendation is made.
const ERROR_RECOMMENDATION_MIN: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportPeriod {
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_archive_attempts: u64,
    pub success_rate: f64,
    pub avg_latency: f64,
    pub most_used_service: String,
    pub most_common_error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringReport {
    pub generated_at: u64,
    pub report_period: ReportPeriod,
    pub summary: ReportSummary,
    pub service_details: Vec<ServiceHealth>,
    pub alerts: Vec<Alert>,
    pub recommendations: Vec<String>,
}

pub(crate) fn build(
    now: u64,
    stats: AggregatedStats,
    snapshot: MetricsSnapshot,
    services: Vec<ServiceHealth>,
    alerts: Vec<Alert>,
) -> MonitoringReport {
    let most_used_service = stats
        .service_breakdown
        .iter()
        .filter(|(_, s)| s.attempts > 0)
        .max_by_key(|(_, s)| s.attempts)
        .map_or_else(|| "none".to_string(), |(id, _)| id.clone());
    let most_common_error = stats
        .error_breakdown
        .iter()
        .filter(|(_, count)| **count > 0)
        .max_by_key(|(_, count)| **count)
        .map_or_else(|| "none".to_string(), |(kind, _)| kind.clone());

    let recommendations = recommendations(&stats, &services, &snapshot);

    MonitoringReport {
        generated_at: now,
        report_period: ReportPeriod {
            start: stats.start_time,
            end: stats.end_time,
        },
        summary: ReportSummary {
            total_archive_attempts: stats.archive_attempts,
            success_rate: if stats.archive_attempts > 0 {
                stats.archive_successes as f64 / stats.archive_attempts as f64
            } else {
                0.0
            },
            avg_latency: snapshot.avg_duration,
            most_used_service,
            most_common_error,
        },
        service_details: services,
        alerts,
        recommendations,
    }
}

fn recommendations(stats: &AggregatedStats, services: &[ServiceHealth], snapshot: &MetricsSnapshot) -> Vec<String> {
    let mut out = Vec::new();

    if snapshot.archive_attempts > 0 && snapshot.success_rate < 0.8 {
        out.push(
            "Archive success rate is below 80%. Check service availability and network connectivity."
                .to_string(),
        );
    }
    if snapshot.avg_duration > 30_000.0 {
        out.push(
            "Average archive time exceeds 30 seconds. This may indicate network issues or service congestion."
                .to_string(),
        );
    }

    let unhealthy: Vec<&str> = services
        .iter()
        .filter(|s| s.status == HealthStatus::Unhealthy)
        .map(|s| s.service_id.as_str())
        .collect();
    if !unhealthy.is_empty() {
        out.push(format!(
            "{} service(s) are unhealthy: {}. Consider relying on fallback services.",
            unhealthy.len(),
            unhealthy.join(", ")
        ));
    }

    // Keys are "service:ERROR_TYPE".
    for (key, count) in &snapshot.error_breakdown {
        if *count <= ERROR_RECOMMENDATION_MIN {
            continue;
        }
        let Some((service, kind)) = key.split_once(':') else {
            continue;
        };
        match kind {
            "RATE_LIMIT" => out.push(format!(
                "Rate limiting detected for {service}. Space out archive requests or use another service."
            )),
            "TIMEOUT" => out.push(format!(
                "Timeout errors detected for {service}. Consider raising its timeout_ms."
            )),
            "BLOCKED" => out.push(format!(
                "Some URLs are being blocked by {service}. Put another service ahead of it in the fallback order."
            )),
            _ => {}
        }
    }

    if stats.archive_attempts == 0 {
        out.push("No archive activity in the reporting period. Check that auto-archiving is enabled.".to_string());
    }
    out
}

/// Human-readable rendering of a report.
pub fn format_report_as_text(report: &MonitoringReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "       ARCHIVE MONITORING REPORT");
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out);
    let _ = writeln!(out, "Generated: {}", report.generated_at);
    let _ = writeln!(out, "Period: {} - {}", report.report_period.start, report.report_period.end);
    let _ = writeln!(out);
    let _ = writeln!(out, "── SUMMARY ──────────────────────────────────");
    let _ = writeln!(out, "Total Archives: {}", report.summary.total_archive_attempts);
    let _ = writeln!(out, "Success Rate: {:.1}%", report.summary.success_rate * 100.0);
    let _ = writeln!(out, "Avg Latency: {:.1}s", report.summary.avg_latency / 1000.0);
    let _ = writeln!(out, "Most Used: {}", report.summary.most_used_service);
    let _ = writeln!(out, "Top Error: {}", report.summary.most_common_error);
    let _ = writeln!(out);
    let _ = writeln!(out, "── SERVICES ─────────────────────────────────");
    for service in &report.service_details {
        let _ = writeln!(
            out,
            "{} {:<20} {:<10} {:.0}%",
            service.status.icon(),
            service.service_id,
            service.status.as_str(),
            service.success_rate * 100.0
        );
    }

    if !report.alerts.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "── ALERTS ───────────────────────────────────");
        for alert in report.alerts.iter().take(MAX_LISTED_ALERTS) {
            let state = if alert.resolved { "[RESOLVED]" } else { "[ACTIVE]" };
            let _ = writeln!(
                out,
                "{:<8} {} {}",
                alert.severity.as_str().to_uppercase(),
                state,
                alert.message
            );
        }
        if report.alerts.len() > MAX_LISTED_ALERTS {
            let _ = writeln!(out, "... and {} more", report.alerts.len() - MAX_LISTED_ALERTS);
        }
    }

    if !report.recommendations.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "── RECOMMENDATIONS ──────────────────────────");
        for recommendation in &report.recommendations {
            let _ = writeln!(out, "• {recommendation}");
        }
    }

    let _ = writeln!(out);
    let _ = write!(out, "{RULE}");
    out
}
