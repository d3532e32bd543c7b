//! Alert rule evaluation.
//!
//! # Evaluation Tick
//! ```text
//! for each enabled rule outside its cooldown:
//!     condition true → new Alert, last_triggered = now, notify
//! for each unresolved alert:
//!     its rule's condition false → resolved (cooldown does not apply)
//! ```
//!
//! # Design Decisions
//! - Rule and alert state sit behind one mutex; it is released before
//!   notifiers are awaited
//! - The alert log is bounded; the oldest entries are dropped first

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::alerting::notifier::{LogNotifier, Notification, Notifier};
use crate::alerting::rules::{default_rules, Alert, AlertCondition, AlertRule, Metric, Severity};
use crate::clock::SharedClock;
use crate::config::AlertingConfig;
use crate::health::{HealthChecker, HealthStatus};
use crate::lifecycle::ticker::PeriodicTask;
use crate::metrics::MetricsRegistry;
use crate::observability::metrics;
use crate::resilience::CircuitBreakerManager;

/// Query over the alert log. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertFilter {
    pub since: Option<u64>,
    pub severity: Option<Severity>,
    pub resolved: Option<bool>,
    /// Keep only the newest `limit` matches.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStats {
    pub total: usize,
    pub active: usize,
    pub resolved: usize,
    pub by_severity: BTreeMap<String, usize>,
    /// Mean time from trigger to resolution over resolved alerts (ms).
    pub avg_resolution_time: f64,
}

#[derive(Serialize)]
struct AlertExport<'a> {
    rules: &'a [AlertRule],
    alerts: Vec<Alert>,
    stats: AlertStats,
}

#[derive(Debug, Default)]
struct State {
    rules: Vec<AlertRule>,
    alerts: VecDeque<Alert>,
}

pub struct AlertingManager {
    config: AlertingConfig,
    metrics: Arc<MetricsRegistry>,
    health: Arc<HealthChecker>,
    breakers: Arc<CircuitBreakerManager>,
    notifier: Arc<dyn Notifier>,
    clock: SharedClock,
    state: Mutex<State>,
    ticker: PeriodicTask,
}

impl std::fmt::Debug for AlertingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("AlertingManager")
            .field("config", &self.config)
            .field("rules", &state.rules.len())
            .field("alerts", &state.alerts.len())
            .finish()
    }
}

impl AlertingManager {
    /// Manager loaded with [`default_rules`] and logging notifications.
    pub fn new(
        config: AlertingConfig,
        metrics: Arc<MetricsRegistry>,
        health: Arc<HealthChecker>,
        breakers: Arc<CircuitBreakerManager>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            metrics,
            health,
            breakers,
            notifier: Arc::new(LogNotifier),
            clock,
            state: Mutex::new(State {
                rules: default_rules(),
                alerts: VecDeque::new(),
            }),
            ticker: PeriodicTask::new("alert-evaluation"),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Start periodic evaluation. A second call while running is a no-op.
    pub fn start(self: &Arc<Self>) -> bool {
        let manager = Arc::clone(self);
        let started = self
            .ticker
            .start(Duration::from_millis(self.config.check_interval_ms), move || {
                let manager = Arc::clone(&manager);
                async move {
                    manager.evaluate().await;
                }
            });
        if started {
            tracing::info!(interval_ms = self.config.check_interval_ms, "Alerting started");
        }
        started
    }

    pub fn stop(&self) -> bool {
        let stopped = self.ticker.stop();
        if stopped {
            tracing::info!("Alerting stopped");
        }
        stopped
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_running()
    }

    /// Add a rule, replacing any rule with the same id.
    pub fn add_rule(&self, rule: AlertRule) {
        let mut state = self.lock();
        tracing::info!(rule = %rule.id, "Alert rule added");
        match state.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => state.rules.push(rule),
        }
    }

    pub fn remove_rule(&self, rule_id: &str) -> bool {
        let mut state = self.lock();
        let before = state.rules.len();
        state.rules.retain(|r| r.id != rule_id);
        let removed = state.rules.len() != before;
        if removed {
            tracing::info!(rule = %rule_id, "Alert rule removed");
        }
        removed
    }

    /// Returns false for unknown rules.
    pub fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> bool {
        let mut state = self.lock();
        match state.rules.iter_mut().find(|r| r.id == rule_id) {
            Some(rule) => {
                rule.enabled = enabled;
                tracing::info!(rule = %rule_id, enabled, "Alert rule updated");
                true
            }
            None => false,
        }
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        self.lock().rules.clone()
    }

    /// Run one evaluation tick. Returns the alerts it triggered.
    pub async fn evaluate(&self) -> Vec<Alert> {
        let triggered = self.evaluate_rules();

        if self.config.enable_notifications {
            for alert in &triggered {
                let notification = Notification::for_alert(alert);
                if let Err(e) = self.notifier.notify(&notification).await {
                    tracing::error!(rule = %alert.rule_id, error = %e, "Failed to show notification");
                }
            }
        }
        triggered
    }

    /// Current value of the metric a condition watches; `None` when there is no data.
    pub fn metric_value(&self, condition: &AlertCondition) -> Option<f64> {
        let service = condition.service_id.as_deref();
        match condition.metric {
            Metric::SuccessRate => self.windowed(service, condition.window_ms).observed_success_rate(),
            Metric::AvgLatency => self.windowed(service, condition.window_ms).observed_avg_duration(),
            Metric::FailureCount => Some(self.windowed(service, condition.window_ms).failures as f64),
            Metric::ActiveOperations => Some(self.metrics.active_operations() as f64),
            Metric::ServiceHealth => {
                let unhealthy = match service {
                    Some(id) => self
                        .health
                        .get_service_health(id)
                        .is_some_and(|h| h.status == HealthStatus::Unhealthy),
                    None => self.health.get_system_health().unhealthy_count > 0,
                };
                Some(if unhealthy { 0.0 } else { 1.0 })
            }
            Metric::AvailableServices => {
                let available = self
                    .health
                    .get_all_health()
                    .iter()
                    .filter(|h| h.status != HealthStatus::Unhealthy)
                    .count();
                Some(available as f64)
            }
            Metric::OpenCircuits => Some(self.breakers.open_count() as f64),
        }
    }

    pub fn get_active_alerts(&self) -> Vec<Alert> {
        self.lock().alerts.iter().filter(|a| !a.resolved).cloned().collect()
    }

    /// Matching alerts, oldest first.
    pub fn get_alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        let state = self.lock();
        let matching: Vec<Alert> = state
            .alerts
            .iter()
            .filter(|a| filter.since.map_or(true, |since| a.timestamp >= since))
            .filter(|a| filter.severity.map_or(true, |s| a.severity == s))
            .filter(|a| filter.resolved.map_or(true, |r| a.resolved == r))
            .cloned()
            .collect();
        match filter.limit {
            Some(limit) if matching.len() > limit => matching[matching.len() - limit..].to_vec(),
            _ => matching,
        }
    }

    pub fn alert_stats(&self) -> AlertStats {
        let state = self.lock();
        let mut by_severity: BTreeMap<String, usize> =
            Severity::ALL.iter().map(|s| (s.as_str().to_string(), 0)).collect();
        let mut resolved = 0;
        let mut resolution_total = 0u64;
        for alert in &state.alerts {
            *by_severity.entry(alert.severity.as_str().to_string()).or_insert(0) += 1;
            if alert.resolved {
                resolved += 1;
                if let Some(at) = alert.resolved_at {
                    resolution_total += at.saturating_sub(alert.timestamp);
                }
            }
        }
        AlertStats {
            total: state.alerts.len(),
            active: state.alerts.len() - resolved,
            resolved,
            by_severity,
            avg_resolution_time: if resolved > 0 {
                resolution_total as f64 / resolved as f64
            } else {
                0.0
            },
        }
    }

    /// Resolve the unresolved alert raised at `timestamp`.
    ///
    /// Returns false when no such alert exists or it is already resolved.
    pub fn acknowledge_alert(&self, timestamp: u64) -> bool {
        let now = self.clock.now_millis();
        let mut state = self.lock();
        match state
            .alerts
            .iter_mut()
            .find(|a| a.timestamp == timestamp && !a.resolved)
        {
            Some(alert) => {
                alert.resolve(now);
                tracing::info!(rule = %alert.rule_id, "Alert acknowledged");
                true
            }
            None => false,
        }
    }

    pub fn clear_alerts(&self) {
        self.lock().alerts.clear();
        tracing::info!("All alerts cleared");
    }

    /// Rules, alerts and statistics as pretty JSON.
    pub fn export(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.export_value())
    }

    pub(crate) fn export_value(&self) -> serde_json::Value {
        let stats = self.alert_stats();
        let state = self.lock();
        let export = AlertExport {
            rules: &state.rules,
            alerts: state.alerts.iter().cloned().collect(),
            stats,
        };
        serde_json::to_value(export).unwrap_or_default()
    }

    fn evaluate_rules(&self) -> Vec<Alert> {
        let now = self.clock.now_millis();
        let mut state = self.lock();
        let State { rules, alerts } = &mut *state;

        let mut triggered = Vec::new();
        for rule in rules.iter_mut().filter(|r| r.enabled) {
            let cooldown = rule.cooldown_ms.unwrap_or(self.config.default_cooldown_ms);
            if rule.in_cooldown(now, cooldown) {
                continue;
            }
            let value = self.metric_value(&rule.condition);
            if rule.condition.is_met(value) {
                rule.last_triggered = Some(now);
                let alert = Alert::from_rule(rule, now, value);
                tracing::warn!(
                    rule = %rule.id,
                    severity = %rule.severity,
                    value = ?value,
                    message = %alert.message,
                    "Alert triggered"
                );
                metrics::record_alert_triggered(&rule.id, rule.severity.as_str());
                triggered.push(alert);
            }
        }

        alerts.extend(triggered.iter().cloned());
        while alerts.len() > self.config.max_alerts {
            alerts.pop_front();
        }

        for alert in alerts.iter_mut().filter(|a| !a.resolved) {
            let Some(rule) = rules.iter().find(|r| r.id == alert.rule_id) else {
                continue;
            };
            if !rule.condition.is_met(self.metric_value(&rule.condition)) {
                alert.resolve(now);
                tracing::info!(
                    rule = %alert.rule_id,
                    duration_ms = now.saturating_sub(alert.timestamp),
                    "Alert resolved"
                );
            }
        }

        triggered
    }

    fn windowed(&self, service: Option<&str>, window_ms: u64) -> crate::metrics::ServiceMetrics {
        match service {
            Some(id) => self.metrics.get_service_metrics(id, Some(window_ms)),
            None => self.metrics.get_window_metrics(window_ms),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::notifier::NotifyError;
    use crate::alerting::rules::Operator;
    use crate::clock::{Clock, ManualClock};
    use crate::config::{CircuitBreakerConfig, HealthConfig, MetricsConfig};
    use crate::metrics::ArchiveAttemptRecord;
    use async_trait::async_trait;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Notification>>);

    #[async_trait]
    impl Notifier for Recorder {
        async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.0.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        metrics: Arc<MetricsRegistry>,
        breakers: Arc<CircuitBreakerManager>,
        health: Arc<HealthChecker>,
        alerts: AlertingManager,
        recorder: Arc<Recorder>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(10_000_000));
        let metrics = Arc::new(MetricsRegistry::new(MetricsConfig::default(), clock.clone()));
        let breakers = Arc::new(CircuitBreakerManager::new(CircuitBreakerConfig::default(), clock.clone()));
        let health = Arc::new(HealthChecker::new(
            HealthConfig::default(),
            metrics.clone(),
            breakers.clone(),
            clock.clone(),
        ));
        let recorder = Arc::new(Recorder::default());
        let alerts = AlertingManager::new(
            AlertingConfig::default(),
            metrics.clone(),
            health.clone(),
            breakers.clone(),
            clock.clone(),
        )
        .with_notifier(recorder.clone());
        Fixture {
            clock,
            metrics,
            breakers,
            health,
            alerts,
            recorder,
        }
    }

    impl Fixture {
        fn only_rule(&self, keep: &str) {
            for rule in self.alerts.rules() {
                if rule.id != keep {
                    self.alerts.remove_rule(&rule.id);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_cooldown_blocks_retrigger_but_not_resolution() {
        let f = fixture();
        f.only_rule("circuit-breaker-open");
        f.breakers.trip("ia");

        assert_eq!(f.alerts.evaluate().await.len(), 1);
        f.clock.advance(60_000);
        assert!(f.alerts.evaluate().await.is_empty(), "still in cooldown");
        assert_eq!(f.alerts.get_active_alerts().len(), 1);

        f.breakers.reset("ia");
        f.clock.advance(60_000);
        assert!(f.alerts.evaluate().await.is_empty());
        assert!(f.alerts.get_active_alerts().is_empty());

        let stats = f.alerts.alert_stats();
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.avg_resolution_time, 120_000.0);
        assert_eq!(stats.by_severity["warning"], 1);
        assert_eq!(stats.by_severity["critical"], 0);

        f.breakers.trip("ia");
        f.clock.advance(600_000);
        assert_eq!(f.alerts.evaluate().await.len(), 1, "cooldown elapsed");
        assert_eq!(f.recorder.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_success_rate_needs_data() {
        let f = fixture();
        f.only_rule("high-failure-rate");
        assert!(f.alerts.evaluate().await.is_empty());

        let now = f.clock.now_millis();
        f.metrics
            .record_archive(ArchiveAttemptRecord::failure("ia", "https://x.org", "SERVER_ERROR", 10, now));
        let triggered = f.alerts.evaluate().await;
        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0].context.current_value, Some(0.0));
        assert_eq!(triggered[0].severity, Severity::Error);
    }

    #[tokio::test]
    async fn test_all_services_down() {
        let f = fixture();
        f.only_rule("all-services-down");

        f.health.init(&["ia"]);
        assert!(f.alerts.evaluate().await.is_empty(), "unknown services count as available");

        let now = f.clock.now_millis();
        f.metrics
            .record_archive(ArchiveAttemptRecord::failure("ia", "https://x.org", "SERVER_ERROR", 10, now));
        f.health.record_failure("ia", None);
        let triggered = f.alerts.evaluate().await;
        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0].severity, Severity::Critical);
        assert_eq!(
            f.recorder.0.lock().unwrap()[0].display_for,
            Duration::from_secs(10)
        );
    }

    #[tokio::test]
    async fn test_per_service_health_rule() {
        let f = fixture();
        f.only_rule("none");
        f.alerts.add_rule(AlertRule::new(
            "ia-unhealthy",
            "IA unhealthy",
            AlertCondition::new(Metric::ServiceHealth, Operator::Eq, 0.0, 60_000).for_service("ia"),
            Severity::Error,
        ));
        f.health.init(&["ia", "at"]);
        f.breakers.trip("at");
        f.health.check_all_services();
        assert!(f.alerts.evaluate().await.is_empty());

        f.breakers.trip("ia");
        f.health.check_all_services();
        assert_eq!(f.alerts.evaluate().await.len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_rule_and_log_queries() {
        let f = fixture();
        f.only_rule("circuit-breaker-open");
        f.breakers.trip("ia");

        assert!(f.alerts.set_rule_enabled("circuit-breaker-open", false));
        assert!(!f.alerts.set_rule_enabled("missing", true));
        assert!(f.alerts.evaluate().await.is_empty());

        f.alerts.set_rule_enabled("circuit-breaker-open", true);
        let first = f.alerts.evaluate().await.remove(0);

        assert_eq!(
            f.alerts
                .get_alerts(&AlertFilter {
                    severity: Some(Severity::Critical),
                    ..Default::default()
                })
                .len(),
            0
        );
        assert_eq!(
            f.alerts
                .get_alerts(&AlertFilter {
                    resolved: Some(false),
                    limit: Some(5),
                    ..Default::default()
                })
                .len(),
            1
        );

        assert!(f.alerts.acknowledge_alert(first.timestamp));
        assert!(!f.alerts.acknowledge_alert(first.timestamp));
        assert!(!f.alerts.acknowledge_alert(1));

        let json: serde_json::Value = serde_json::from_str(&f.alerts.export().unwrap()).unwrap();
        assert_eq!(json["stats"]["resolved"], 1);
        assert_eq!(json["rules"][0]["id"], "circuit-breaker-open");

        f.alerts.clear_alerts();
        assert_eq!(f.alerts.alert_stats().total, 0);
    }

    #[tokio::test]
    async fn test_alert_log_is_bounded() {
        let f = fixture();
        let alerts = AlertingManager::new(
            AlertingConfig {
                max_alerts: 2,
                ..AlertingConfig::default()
            },
            f.metrics.clone(),
            f.health.clone(),
            f.breakers.clone(),
            f.clock.clone(),
        );
        for rule in alerts.rules() {
            alerts.remove_rule(&rule.id);
        }
        alerts.add_rule(
            AlertRule::new(
                "always",
                "Always",
                AlertCondition::new(Metric::ActiveOperations, Operator::Ge, 0.0, 0),
                Severity::Info,
            )
            .with_cooldown(0),
        );
        for _ in 0..3 {
            alerts.evaluate().await;
            f.clock.advance(1);
        }
        let log = alerts.get_alerts(&AlertFilter::default());
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].timestamp, f.clock.now_millis() - 2);
    }
}
