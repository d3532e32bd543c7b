//! Composition root.
//!
//! # Responsibilities
//! - Build every component from one validated [`SentinelConfig`]
//! - Wire them together explicitly; nothing is a process-wide singleton
//! - Start and stop the background loops in dependency order
//!
//! # Startup Order
//! ```text
//! breakers → metrics → health → alerting → registry → coordinator → dashboard
//! start: health loop, alert loop, breaker-event follower
//! stop:  alert loop, health loop, shutdown broadcast, join workers
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::alerting::{AlertingManager, LogNotifier, Notifier};
use crate::archive::{archive_error_filter, ArchiveCoordinator, ArchiveService, DocumentRef, ServiceRegistry};
use crate::clock::SharedClock;
use crate::config::SentinelConfig;
use crate::dashboard::Dashboard;
use crate::health::HealthChecker;
use crate::lifecycle::shutdown::Shutdown;
use crate::metrics::MetricsRegistry;
use crate::observability::SpanLog;
use crate::resilience::CircuitBreakerManager;

pub struct ArchiveSystem {
    config: Mutex<SentinelConfig>,
    breakers: Arc<CircuitBreakerManager>,
    metrics: Arc<MetricsRegistry>,
    health: Arc<HealthChecker>,
    alerting: Arc<AlertingManager>,
    registry: Arc<ServiceRegistry>,
    coordinator: Arc<ArchiveCoordinator>,
    dashboard: Dashboard,
    spans: SpanLog,
    shutdown: Shutdown,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ArchiveSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveSystem")
            .field("services", &self.registry.ids())
            .field("health_running", &self.health.is_running())
            .field("alerting_running", &self.alerting.is_running())
            .finish()
    }
}

impl ArchiveSystem {
    /// Build a system whose alerts are written to the log.
    pub fn new(config: SentinelConfig, clock: SharedClock) -> Self {
        Self::with_notifier(config, clock, Arc::new(LogNotifier))
    }

    pub fn with_notifier(config: SentinelConfig, clock: SharedClock, notifier: Arc<dyn Notifier>) -> Self {
        let breakers = Arc::new(
            CircuitBreakerManager::new(config.circuit_breaker, clock.clone()).with_filter(archive_error_filter()),
        );
        let metrics = Arc::new(MetricsRegistry::new(config.metrics, clock.clone()));
        let health = Arc::new(HealthChecker::new(
            config.health,
            metrics.clone(),
            breakers.clone(),
            clock.clone(),
        ));
        let alerting = Arc::new(
            AlertingManager::new(
                config.alerting,
                metrics.clone(),
                health.clone(),
                breakers.clone(),
                clock.clone(),
            )
            .with_notifier(notifier),
        );
        let registry = Arc::new(ServiceRegistry::new());
        let coordinator = Arc::new(ArchiveCoordinator::new(
            registry.clone(),
            breakers.clone(),
            metrics.clone(),
            health.clone(),
            config.archive.clone(),
            clock.clone(),
        ));
        let spans = SpanLog::new(config.observability.max_spans, clock.clone());
        let dashboard = Dashboard::new(
            metrics.clone(),
            health.clone(),
            alerting.clone(),
            spans.clone(),
            clock,
        );

        tracing::info!(
            default_service = %config.archive.default_service,
            fallback_order = ?config.archive.fallback_order,
            "Archive system initialized"
        );

        Self {
            config: Mutex::new(config),
            breakers,
            metrics,
            health,
            alerting,
            registry,
            coordinator,
            dashboard,
            spans,
            shutdown: Shutdown::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Register an adapter and start tracking its health.
    pub fn register_service(&self, id: &str, service: Arc<dyn ArchiveService>) {
        self.registry.register(id, service);
        if self.health.get_service_health(id).is_none() {
            self.health.init(&[id]);
        }
    }

    pub fn unregister_service(&self, id: &str) -> bool {
        self.health.remove(id);
        self.registry.unregister(id)
    }

    /// Start the health and alert loops and the breaker-event follower.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(&self) {
        self.health.start();
        self.alerting.start();

        let health = self.health.clone();
        let events = self.breakers.subscribe();
        let shutdown = self.shutdown.subscribe();
        self.lock_workers().push(tokio::spawn(async move {
            health.follow_breaker_events(events, shutdown).await;
        }));
        tracing::info!(services = self.registry.len(), "Archive system started");
    }

    /// Feed "document added" events into auto-archive until shutdown.
    pub fn spawn_auto_archive(&self, feed: mpsc::Receiver<DocumentRef>) {
        let coordinator = self.coordinator.clone();
        let shutdown = self.shutdown.subscribe();
        self.lock_workers().push(tokio::spawn(async move {
            coordinator.run_auto_archive(feed, shutdown).await;
        }));
    }

    /// Stop every loop and wait for spawned workers to finish.
    pub async fn stop(&self) {
        self.alerting.stop();
        self.health.stop();
        self.shutdown.trigger();

        let workers: Vec<JoinHandle<()>> = self.lock_workers().drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Worker ended abnormally");
            }
        }
        tracing::info!("Archive system stopped");
    }

    /// Apply a reloaded configuration.
    ///
    /// Archive preferences take effect immediately; other sections are only
    /// read at construction and need a restart.
    pub fn apply_config(&self, new: SentinelConfig) {
        let mut current = self.config.lock().unwrap_or_else(PoisonError::into_inner);
        if new.archive != current.archive {
            self.coordinator.update_preferences(new.archive.clone());
        }
        let restart_needed = new.circuit_breaker != current.circuit_breaker
            || new.metrics != current.metrics
            || new.health != current.health
            || new.alerting != current.alerting
            || new.observability != current.observability;
        if restart_needed {
            tracing::warn!("Configuration changes outside [archive] take effect after restart");
        }
        *current = new;
    }

    pub fn config(&self) -> SentinelConfig {
        self.config.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn coordinator(&self) -> &Arc<ArchiveCoordinator> {
        &self.coordinator
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.breakers
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn health(&self) -> &Arc<HealthChecker> {
        &self.health
    }

    pub fn alerting(&self) -> &Arc<AlertingManager> {
        &self.alerting
    }

    pub fn dashboard(&self) -> &Dashboard {
        &self.dashboard
    }

    /// Span recorder to attach to the global subscriber.
    pub fn spans(&self) -> &SpanLog {
        &self.spans
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveError, ArchiveResult};
    use crate::clock::ManualClock;
    use async_trait::async_trait;

    struct Idle;

    #[async_trait]
    impl ArchiveService for Idle {
        fn name(&self) -> &str {
            "idle"
        }

        async fn is_available(&self) -> Result<bool, ArchiveError> {
            Ok(true)
        }

        async fn archive(&self, _documents: &[DocumentRef]) -> Result<Vec<ArchiveResult>, ArchiveError> {
            Ok(Vec::new())
        }
    }

    fn system() -> ArchiveSystem {
        ArchiveSystem::new(SentinelConfig::default(), Arc::new(ManualClock::new(1_000)))
    }

    #[test]
    fn test_register_seeds_health() {
        let system = system();
        system.register_service("ia", Arc::new(Idle));
        assert_eq!(system.registry().ids(), vec!["ia".to_string()]);
        assert!(system.health().get_service_health("ia").is_some());

        assert!(system.unregister_service("ia"));
        assert!(system.health().get_service_health("ia").is_none());
    }

    #[test]
    fn test_apply_config_hot_swaps_archive_preferences() {
        let system = system();
        let mut config = SentinelConfig::default();
        config.archive.fallback_order = vec!["at".to_string(), "ia".to_string()];
        config.archive.auto_archive = false;
        system.apply_config(config.clone());

        let preferences = system.coordinator().preferences();
        assert_eq!(preferences.fallback_order, config.archive.fallback_order);
        assert!(!preferences.auto_archive);
        assert_eq!(system.config(), config);
    }

    #[tokio::test]
    async fn test_start_stop() {
        let system = system();
        system.start();
        assert!(system.health().is_running());
        assert!(system.alerting().is_running());

        let (_tx, rx) = mpsc::channel(1);
        system.spawn_auto_archive(rx);
        system.stop().await;
        assert!(!system.health().is_running());
        assert!(!system.alerting().is_running());
    }
}
