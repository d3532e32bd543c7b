//! One circuit breaker per archive service.
//!
//! Breakers are created lazily on first use and live for the lifetime of the
//! manager. All breakers publish onto a single event stream so health and
//! alerting can subscribe once.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::clock::SharedClock;
use crate::config::CircuitBreakerConfig;
use crate::resilience::circuit_breaker::{
    count_all_failures, CircuitBreaker, CircuitBreakerState, CircuitError, CircuitState, ErrorFilter,
    StateChangeEvent,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Registry of per-service breakers.
pub struct CircuitBreakerManager {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
    filter: ErrorFilter,
    clock: SharedClock,
    events: broadcast::Sender<StateChangeEvent>,
}

impl std::fmt::Debug for CircuitBreakerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerManager")
            .field("config", &self.config)
            .field("breakers", &self.breakers.len())
            .finish()
    }
}

impl CircuitBreakerManager {
    pub fn new(config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            breakers: DashMap::new(),
            config,
            filter: count_all_failures(),
            clock,
            events,
        }
    }

    /// Use `filter` for every breaker created from now on.
    pub fn with_filter(mut self, filter: ErrorFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Get or create the breaker for `service_id`.
    pub fn get_breaker(&self, service_id: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(service_id) {
            return Arc::clone(existing.value());
        }
        let entry = self.breakers.entry(service_id.to_string()).or_insert_with(|| {
            tracing::debug!(service = %service_id, "Creating circuit breaker");
            Arc::new(CircuitBreaker::with_parts(
                service_id.to_string(),
                self.config,
                Arc::clone(&self.filter),
                Arc::clone(&self.clock),
                self.events.clone(),
            ))
        });
        Arc::clone(entry.value())
    }

    /// Existing breaker, if one was ever created.
    pub fn get(&self, service_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(service_id).map(|b| Arc::clone(b.value()))
    }

    /// Run `operation` through the breaker for `service_id`.
    pub async fn execute<T, E, Fut>(&self, service_id: &str, operation: Fut) -> Result<T, CircuitError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let breaker = self.get_breaker(service_id);
        breaker.execute(operation).await
    }

    /// State of a service's breaker; services never called are Closed.
    pub fn state_of(&self, service_id: &str) -> CircuitState {
        self.get(service_id).map_or(CircuitState::Closed, |b| b.state())
    }

    pub fn all_states(&self) -> BTreeMap<String, CircuitBreakerState> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }

    /// Services whose breaker is not Open, sorted by id.
    pub fn available_services(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .breakers
            .iter()
            .filter(|entry| entry.value().state() != CircuitState::Open)
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn open_count(&self) -> usize {
        self.breakers
            .iter()
            .filter(|entry| entry.value().state() == CircuitState::Open)
            .count()
    }

    /// Manually reset one breaker. Returns false for unknown services.
    pub fn reset(&self, service_id: &str) -> bool {
        match self.get(service_id) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Manually open the breaker for `service_id`, creating it if needed.
    pub fn trip(&self, service_id: &str) {
        self.get_breaker(service_id).trip();
    }

    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    /// Transitions from every breaker owned by this manager.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChangeEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[derive(Debug, thiserror::Error)]
    #[error("down")]
    struct Down;

    fn manager() -> CircuitBreakerManager {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            timeout_ms: 100,
            volume_threshold: 1,
        };
        CircuitBreakerManager::new(config, Arc::new(ManualClock::new(0)))
    }

    #[test]
    fn test_breakers_created_lazily_and_retained() {
        let m = manager();
        assert!(m.get("ia").is_none());
        let a = m.get_breaker("ia");
        let b = m.get_breaker("ia");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(m.state_of("never-used"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_available_excludes_open() {
        let m = manager();
        m.execute("ia", async { Ok::<_, Down>(()) }).await.unwrap();
        let _ = m.execute("at", async { Err::<(), _>(Down) }).await;

        assert_eq!(m.available_services(), vec!["ia".to_string()]);
        assert_eq!(m.open_count(), 1);
        assert_eq!(m.all_states()["at"].state, CircuitState::Open);

        m.reset_all();
        assert_eq!(m.open_count(), 0);
    }

    #[tokio::test]
    async fn test_single_event_stream_for_all_breakers() {
        let m = manager();
        let mut rx = m.subscribe();
        m.trip("a");
        m.trip("b");
        assert_eq!(rx.try_recv().unwrap().service_id, "a");
        assert_eq!(rx.try_recv().unwrap().service_id, "b");
        assert!(!m.reset("missing"));
    }
}
