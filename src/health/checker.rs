//! Service health checking.
//!
//! # Responsibilities
//! - Reduce windowed metrics and breaker state into a per-service status
//! - Recompute periodically, and immediately when an attempt is recorded
//! - Roll every service up into one system status
//!
//! # Status Rules (first match wins)
//! ```text
//! breaker OPEN                                  → UNHEALTHY
//! no attempts in the window                     → UNKNOWN
//! success rate >= healthy and latency in bound  → HEALTHY
//! success rate >= healthy, latency over bound   → DEGRADED
//! success rate >= degraded                      → DEGRADED
//! otherwise                                     → UNHEALTHY
//! ```

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::clock::SharedClock;
use crate::config::HealthConfig;
use crate::health::status::{HealthStatus, ServiceHealth, SystemHealth};
use crate::lifecycle::ticker::PeriodicTask;
use crate::metrics::MetricsRegistry;
use crate::observability::metrics;
use crate::resilience::{CircuitBreakerManager, CircuitState, StateChangeEvent};

pub struct HealthChecker {
    config: HealthConfig,
    metrics: Arc<MetricsRegistry>,
    breakers: Arc<CircuitBreakerManager>,
    clock: SharedClock,
    services: RwLock<BTreeMap<String, ServiceHealth>>,
    last_check: AtomicU64,
    ticker: PeriodicTask,
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("config", &self.config)
            .field("services", &self.read().len())
            .field("running", &self.ticker.is_running())
            .finish()
    }
}

impl HealthChecker {
    pub fn new(
        config: HealthConfig,
        metrics: Arc<MetricsRegistry>,
        breakers: Arc<CircuitBreakerManager>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            metrics,
            breakers,
            clock,
            services: RwLock::new(BTreeMap::new()),
            last_check: AtomicU64::new(0),
            ticker: PeriodicTask::new("health-check"),
        }
    }

    /// Seed an UNKNOWN entry for each id. Existing entries are reset.
    pub fn init<S: AsRef<str>>(&self, service_ids: &[S]) {
        let mut services = self.write();
        for id in service_ids {
            let id = id.as_ref();
            services.insert(id.to_string(), ServiceHealth::unknown(id));
        }
        tracing::info!(services = services.len(), "Health checker initialized");
    }

    /// Stop tracking a service.
    pub fn remove(&self, service_id: &str) -> bool {
        self.write().remove(service_id).is_some()
    }

    /// Start the periodic check loop. A second call while running is a no-op.
    pub fn start(self: &Arc<Self>) -> bool {
        let checker = Arc::clone(self);
        let started = self
            .ticker
            .start(Duration::from_millis(self.config.check_interval_ms), move || {
                let checker = Arc::clone(&checker);
                async move { checker.check_all_services() }
            });
        if started {
            tracing::info!(interval_ms = self.config.check_interval_ms, "Health checks started");
        }
        started
    }

    pub fn stop(&self) -> bool {
        let stopped = self.ticker.stop();
        if stopped {
            tracing::info!("Health checks stopped");
        }
        stopped
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_running()
    }

    /// Recompute a service as soon as its breaker changes state.
    ///
    /// Runs until `shutdown` fires or the breaker stream closes.
    pub async fn follow_breaker_events(
        &self,
        mut events: broadcast::Receiver<StateChangeEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        tracing::debug!(
                            service = %event.service_id,
                            from = %event.previous_state,
                            to = %event.new_state,
                            "Breaker transition, rechecking health"
                        );
                        self.update_service_health(&event.service_id);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Missed breaker events, running full check");
                        self.check_all_services();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.recv() => break,
            }
        }
    }

    /// Recompute every known service.
    pub fn check_all_services(&self) {
        self.last_check.store(self.clock.now_millis(), Ordering::Relaxed);
        let ids: Vec<String> = self.read().keys().cloned().collect();
        for id in &ids {
            self.update_service_health(id);
        }

        let unhealthy: Vec<String> = self
            .read()
            .values()
            .filter(|h| h.status == HealthStatus::Unhealthy)
            .map(|h| h.service_id.clone())
            .collect();
        tracing::debug!(services = ids.len(), unhealthy = ?unhealthy, "Health check complete");
    }

    /// Recompute one service from scratch, replacing its previous entry.
    pub fn update_service_health(&self, service_id: &str) -> ServiceHealth {
        let health = self.compute(service_id);

        let previous = self.write().insert(service_id.to_string(), health.clone());
        if let Some(previous) = previous.filter(|p| p.status != health.status) {
            tracing::info!(
                service = %service_id,
                from = %previous.status,
                to = %health.status,
                message = health.message.as_deref().unwrap_or(""),
                "Service health changed"
            );
        }
        metrics::record_service_health(service_id, health.status.gauge_value());
        health
    }

    /// An attempt against `service_id` succeeded.
    pub fn record_success(&self, service_id: &str) {
        self.update_service_health(service_id);
    }

    /// An attempt against `service_id` failed.
    pub fn record_failure(&self, service_id: &str, error: Option<&str>) {
        if let Some(error) = error {
            tracing::debug!(service = %service_id, error, "Recording service failure");
        }
        self.update_service_health(service_id);
    }

    pub fn get_service_health(&self, service_id: &str) -> Option<ServiceHealth> {
        self.read().get(service_id).cloned()
    }

    pub fn get_all_health(&self) -> Vec<ServiceHealth> {
        self.read().values().cloned().collect()
    }

    pub fn get_healthy_services(&self) -> Vec<String> {
        self.ids_where(|s| s == HealthStatus::Healthy)
    }

    /// Services known to be working: HEALTHY or DEGRADED.
    pub fn get_available_services(&self) -> Vec<String> {
        self.ids_where(|s| matches!(s, HealthStatus::Healthy | HealthStatus::Degraded))
    }

    /// Whether a service may be tried. New or idle (UNKNOWN) services may.
    pub fn is_service_available(&self, service_id: &str) -> bool {
        self.read()
            .get(service_id)
            .is_some_and(|h| h.status != HealthStatus::Unhealthy)
    }

    pub fn get_system_health(&self) -> SystemHealth {
        let statuses: Vec<HealthStatus> = self.read().values().map(|h| h.status).collect();
        SystemHealth::rollup(&statuses, self.last_check.load(Ordering::Relaxed))
    }

    /// Plain-text report of the system and every service.
    pub fn generate_report(&self) -> String {
        let system = self.get_system_health();
        let mut out = String::new();
        let _ = writeln!(out, "=== Archive Health Report ===");
        let _ = writeln!(out, "Generated at: {}", self.clock.now_millis());
        let _ = writeln!(out, "System Status: {}", system.status);
        let _ = writeln!(out, "  Healthy: {}", system.healthy_count);
        let _ = writeln!(out, "  Degraded: {}", system.degraded_count);
        let _ = writeln!(out, "  Unhealthy: {}", system.unhealthy_count);
        let _ = writeln!(out, "  Unknown: {}", system.unknown_count);
        let _ = writeln!(out);
        let _ = write!(out, "--- Service Details ---");

        for service in self.get_all_health() {
            let _ = write!(out, "\n{} {}", service.status.icon(), service.service_id);
            let _ = write!(out, "\n    Status: {}", service.status);
            let _ = write!(out, "\n    Success Rate: {:.1}%", service.success_rate * 100.0);
            let _ = write!(out, "\n    Avg Latency: {:.0}ms", service.avg_latency);
            let _ = write!(out, "\n    Circuit: {}", service.circuit_state);
            if let Some(message) = &service.message {
                let _ = write!(out, "\n    Note: {message}");
            }
        }
        out
    }

    fn compute(&self, service_id: &str) -> ServiceHealth {
        let stats = self
            .metrics
            .get_service_metrics(service_id, Some(self.config.window_ms));
        let circuit_state = self.breakers.state_of(service_id);
        let rate = stats.success_rate;
        let latency = stats.avg_duration;

        let (status, message) = if circuit_state == CircuitState::Open {
            (HealthStatus::Unhealthy, Some("Circuit breaker is open".to_string()))
        } else if stats.attempts == 0 {
            (HealthStatus::Unknown, Some("No recent activity".to_string()))
        } else if rate >= self.config.healthy_threshold {
            if latency > self.config.latency_threshold_ms {
                (HealthStatus::Degraded, Some(format!("High latency: {latency:.0}ms")))
            } else {
                (HealthStatus::Healthy, None)
            }
        } else if rate >= self.config.degraded_threshold {
            (HealthStatus::Degraded, Some(format!("Success rate: {:.1}%", rate * 100.0)))
        } else {
            (HealthStatus::Unhealthy, Some(format!("Low success rate: {:.1}%", rate * 100.0)))
        };

        ServiceHealth {
            service_id: service_id.to_string(),
            status,
            last_check: self.clock.now_millis(),
            success_rate: if stats.attempts == 0 { 1.0 } else { rate },
            avg_latency: latency,
            circuit_state,
            error_count: stats.failures,
            message,
        }
    }

    fn ids_where(&self, keep: impl Fn(HealthStatus) -> bool) -> Vec<String> {
        self.read()
            .values()
            .filter(|h| keep(h.status))
            .map(|h| h.service_id.clone())
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, ServiceHealth>> {
        self.services.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, ServiceHealth>> {
        self.services.write().unwrap_or_else(PoisonError::into_inner)
    }
}
