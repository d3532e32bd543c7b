//! Circuit breaker for archive service protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: service assumed down, calls fail fast (or use the fallback)
//! - Half-Open: a bounded number of trial calls test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold AND total_calls >= volume_threshold
//! Open → Half-Open: timeout elapsed since last failure (checked on the next call)
//! Half-Open → Closed: consecutive_successes >= success_threshold
//! Half-Open → Open: any counted failure
//! ```
//!
//! # Design Decisions
//! - All counters live behind one mutex; every transition is decided under it,
//!   so exactly one completion drives a Half-Open edge
//! - At most `success_threshold` trial calls are in flight while Half-Open
//! - Trial permits are tagged with a generation; permits from an earlier
//!   Half-Open phase never touch the current one
//! - The lock is never held across an `.await`

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::clock::SharedClock;
use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }

    /// Numeric code exported to the metrics facade.
    pub const fn code(&self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a breaker's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub failure_count: u64,
    pub success_count: u64,
    pub consecutive_successes: u32,
    pub last_failure_timestamp: Option<u64>,
    pub total_calls: u64,
}

/// Why a transition happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    FailureThreshold,
    TimeoutElapsed,
    TrialsSucceeded,
    TrialFailed,
    ManualReset,
    ManualTrip,
}

/// Emitted on every state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangeEvent {
    pub service_id: String,
    pub previous_state: CircuitState,
    pub new_state: CircuitState,
    pub timestamp: u64,
    pub reason: TransitionReason,
}

/// Result of a call routed through a breaker.
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    #[error("Circuit breaker is OPEN for {0} - service unavailable")]
    Open(String),

    #[error("Circuit breaker for {0} is testing recovery - trial slots are full")]
    HalfOpenBusy(String),

    #[error(transparent)]
    Inner(E),
}

impl<E> CircuitError<E> {
    /// True when the breaker refused the call without running it.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Open(_) | Self::HalfOpenBusy(_))
    }
}

/// Decides whether a failure counts toward opening the breaker.
pub type ErrorFilter = Arc<dyn Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync>;

/// Filter that counts every failure.
pub fn count_all_failures() -> ErrorFilter {
    Arc::new(|_: &(dyn std::error::Error + 'static)| true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    Open,
    HalfOpenBusy,
}

#[derive(Debug, Default)]
struct Inner {
    state: CircuitState,
    failure_count: u64,
    success_count: u64,
    consecutive_successes: u32,
    last_failure: Option<u64>,
    total_calls: u64,
    half_open_pending: u32,
    generation: u64,
}

/// Per-service circuit breaker.
pub struct CircuitBreaker {
    service_id: String,
    config: CircuitBreakerConfig,
    filter: ErrorFilter,
    clock: SharedClock,
    events: broadcast::Sender<StateChangeEvent>,
    inner: Mutex<Inner>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("service_id", &self.service_id)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

/// Admission ticket for one call. Releases its half-open slot on drop.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: Option<u64>,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.trial {
            let mut inner = self.breaker.lock();
            if inner.generation == generation && inner.half_open_pending > 0 {
                inner.half_open_pending -= 1;
            }
        }
    }
}

impl CircuitBreaker {
    /// Create a standalone breaker with its own event channel.
    pub fn new(service_id: impl Into<String>, config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self::with_parts(service_id.into(), config, count_all_failures(), clock, events)
    }

    pub(crate) fn with_parts(
        service_id: String,
        config: CircuitBreakerConfig,
        filter: ErrorFilter,
        clock: SharedClock,
        events: broadcast::Sender<StateChangeEvent>,
    ) -> Self {
        Self {
            service_id,
            config,
            filter,
            clock,
            events,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Replace the failure filter.
    pub fn with_filter(mut self, filter: ErrorFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChangeEvent> {
        self.events.subscribe()
    }

    /// Current stored state. The Open → Half-Open edge is only taken on a call.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let inner = self.lock();
        CircuitBreakerState {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            consecutive_successes: inner.consecutive_successes,
            last_failure_timestamp: inner.last_failure,
            total_calls: inner.total_calls,
        }
    }

    /// Run `operation` under breaker protection.
    pub async fn execute<T, E, Fut>(&self, operation: Fut) -> Result<T, CircuitError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        match self.admit() {
            Ok(permit) => self.run(permit, operation).await,
            Err(Rejection::Open) => Err(CircuitError::Open(self.service_id.clone())),
            Err(Rejection::HalfOpenBusy) => Err(CircuitError::HalfOpenBusy(self.service_id.clone())),
        }
    }

    /// Like [`execute`](Self::execute), but a rejected call runs `fallback`.
    pub async fn execute_or_else<T, E, Fut, F, FbFut>(
        &self,
        operation: Fut,
        fallback: F,
    ) -> Result<T, CircuitError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        F: FnOnce() -> FbFut,
        FbFut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        match self.admit() {
            Ok(permit) => self.run(permit, operation).await,
            Err(rejection) => {
                tracing::debug!(
                    service = %self.service_id,
                    rejection = ?rejection,
                    "Call rejected by circuit breaker, using fallback"
                );
                fallback().await.map_err(CircuitError::Inner)
            }
        }
    }

    /// Force the breaker closed and clear every counter.
    pub fn reset(&self) {
        let now = self.clock.now_millis();
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Closed, TransitionReason::ManualReset, now);
        let generation = inner.generation;
        *inner = Inner {
            generation,
            ..Inner::default()
        };
    }

    /// Force the breaker open as if a failure just happened.
    pub fn trip(&self) {
        let now = self.clock.now_millis();
        let mut inner = self.lock();
        inner.last_failure = Some(now);
        inner.consecutive_successes = 0;
        self.transition(&mut inner, CircuitState::Open, TransitionReason::ManualTrip, now);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run<T, E, Fut>(&self, permit: Permit<'_>, operation: Fut) -> Result<T, CircuitError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        match operation.await {
            Ok(value) => {
                self.on_success(&permit);
                Ok(value)
            }
            Err(error) => {
                let counted = (self.filter)(&error);
                self.on_failure(&permit, counted);
                Err(CircuitError::Inner(error))
            }
        }
    }

    fn admit(&self) -> Result<Permit<'_>, Rejection> {
        let now = self.clock.now_millis();
        let mut inner = self.lock();

        if inner.state == CircuitState::Open {
            let elapsed = inner
                .last_failure
                .map_or(u64::MAX, |at| now.saturating_sub(at));
            if elapsed >= self.config.timeout_ms {
                self.transition(&mut inner, CircuitState::HalfOpen, TransitionReason::TimeoutElapsed, now);
            }
        }

        let trial = match inner.state {
            CircuitState::Open => return Err(Rejection::Open),
            CircuitState::HalfOpen => {
                if inner.half_open_pending >= self.config.success_threshold {
                    return Err(Rejection::HalfOpenBusy);
                }
                inner.half_open_pending += 1;
                Some(inner.generation)
            }
            CircuitState::Closed => None,
        };
        inner.total_calls += 1;

        Ok(Permit {
            breaker: self,
            trial,
        })
    }

    fn on_success(&self, permit: &Permit<'_>) {
        let now = self.clock.now_millis();
        let mut inner = self.lock();
        inner.success_count += 1;

        let current_trial = permit.trial == Some(inner.generation);
        if inner.state == CircuitState::HalfOpen && !current_trial {
            tracing::debug!(service = %self.service_id, "Late success from earlier phase ignored while half-open");
            return;
        }
        inner.consecutive_successes = inner.consecutive_successes.saturating_add(1);

        if inner.state == CircuitState::HalfOpen
            && inner.consecutive_successes >= self.config.success_threshold
        {
            self.transition(&mut inner, CircuitState::Closed, TransitionReason::TrialsSucceeded, now);
            inner.failure_count = 0;
        }
    }

    fn on_failure(&self, permit: &Permit<'_>, counted: bool) {
        if !counted {
            tracing::trace!(service = %self.service_id, "Failure filtered, not counted");
            return;
        }

        let now = self.clock.now_millis();
        let mut inner = self.lock();
        inner.failure_count += 1;
        inner.consecutive_successes = 0;
        inner.last_failure = Some(now);

        match inner.state {
            CircuitState::HalfOpen => {
                if permit.trial.is_none() {
                    tracing::debug!(service = %self.service_id, "Late failure from pre-trial call while half-open");
                }
                self.transition(&mut inner, CircuitState::Open, TransitionReason::TrialFailed, now);
            }
            CircuitState::Closed
                if inner.total_calls >= u64::from(self.config.volume_threshold)
                    && inner.failure_count >= u64::from(self.config.failure_threshold) =>
            {
                self.transition(&mut inner, CircuitState::Open, TransitionReason::FailureThreshold, now);
            }
            _ => {}
        }
    }

    /// Move to `to`, invalidating outstanding trial permits. Caller holds the lock.
    fn transition(&self, inner: &mut Inner, to: CircuitState, reason: TransitionReason, now: u64) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.generation += 1;
        inner.half_open_pending = 0;
        if to == CircuitState::HalfOpen {
            inner.consecutive_successes = 0;
        }

        match to {
            CircuitState::Open => tracing::warn!(
                service = %self.service_id,
                from = %from,
                reason = ?reason,
                failures = inner.failure_count,
                "Circuit breaker opened"
            ),
            _ => tracing::info!(
                service = %self.service_id,
                from = %from,
                to = %to,
                reason = ?reason,
                "Circuit breaker state changed"
            ),
        }
        metrics::record_breaker_state(&self.service_id, to.code());

        // No subscribers is fine.
        let _ = self.events.send(StateChangeEvent {
            service_id: self.service_id.clone(),
            previous_state: from,
            new_state: to,
            timestamp: now,
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[derive(Debug, Error)]
    #[error("{0}")]
    struct TestError(&'static str);

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout_ms: 1_000,
            volume_threshold: 5,
        }
    }

    fn breaker() -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(10_000));
        (CircuitBreaker::new("svc", config(), clock.clone()), clock)
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), CircuitError<TestError>> {
        cb.execute(async { Err::<(), _>(TestError("boom")) }).await
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<u32, CircuitError<TestError>> {
        cb.execute(async { Ok::<_, TestError>(7) }).await
    }

    async fn trip_by_failures(cb: &CircuitBreaker) {
        for _ in 0..2 {
            succeed(cb).await.unwrap();
        }
        for _ in 0..3 {
            let _ = fail(cb).await;
        }
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_volume() {
        let (cb, _) = breaker();
        trip_by_failures(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        let err = succeed(&cb).await.unwrap_err();
        assert!(matches!(err, CircuitError::Open(_)));
    }

    #[tokio::test]
    async fn test_volume_threshold_prevents_early_trip() {
        let (cb, _) = breaker();
        for _ in 0..3 {
            let _ = fail(&cb).await;
        }
        // 3 failures but only 3 calls; volume threshold is 5.
        assert_eq!(cb.state(), CircuitState::Closed);
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_filtered_errors_do_not_count() {
        let (cb, _) = breaker();
        let cb = cb.with_filter(Arc::new(|e: &(dyn std::error::Error + 'static)| {
            e.to_string() != "client"
        }));
        for _ in 0..10 {
            let _ = cb.execute(async { Err::<(), _>(TestError("client")) }).await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 0);
        assert_eq!(cb.snapshot().total_calls, 10);
    }

    #[tokio::test]
    async fn test_half_open_after_timeout_without_timer() {
        let (cb, clock) = breaker();
        trip_by_failures(&cb).await;

        clock.advance(999);
        assert!(matches!(succeed(&cb).await, Err(CircuitError::Open(_))));

        clock.advance(1);
        assert_eq!(succeed(&cb).await.unwrap(), 7);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 0);
    }

    #[tokio::test]
    async fn test_failure_in_half_open_reopens() {
        let (cb, clock) = breaker();
        trip_by_failures(&cb).await;
        clock.advance(1_000);

        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.snapshot().last_failure_timestamp, Some(11_000));
    }

    #[tokio::test]
    async fn test_half_open_limits_concurrent_trials() {
        let (cb, clock) = breaker();
        trip_by_failures(&cb).await;
        clock.advance(1_000);

        let (release_tx, release_rx) = tokio::sync::watch::channel(false);
        let slow = |mut rx: tokio::sync::watch::Receiver<bool>| async move {
            let _ = rx.wait_for(|v| *v).await;
            Ok::<_, TestError>(1)
        };

        let first = cb.execute(slow(release_rx.clone()));
        let second = cb.execute(slow(release_rx.clone()));
        let third = async {
            tokio::task::yield_now().await;
            let r = succeed(&cb).await;
            release_tx.send(true).unwrap();
            r
        };

        let (a, b, c) = tokio::join!(first, second, third);
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert!(matches!(c, Err(CircuitError::HalfOpenBusy(_))));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_success_from_closed_phase_does_not_count_as_trial() {
        let (cb, clock) = breaker();

        let (release_tx, release_rx) = tokio::sync::watch::channel(false);
        let slow = async {
            cb.execute(async {
                let mut rx = release_rx.clone();
                let _ = rx.wait_for(|v| *v).await;
                Ok::<_, TestError>(1)
            })
            .await
        };
        let trip_then_release = async {
            tokio::task::yield_now().await;
            cb.trip();
            release_tx.send(true).unwrap();
        };
        let (late, ()) = tokio::join!(slow, trip_then_release);
        assert!(late.is_ok());
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(1_000);
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.snapshot().consecutive_successes, 1);

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_stale_trial_success_ignored_in_later_half_open() {
        let (cb, clock) = breaker();
        cb.trip();
        clock.advance(1_000);

        let (release_tx, release_rx) = tokio::sync::watch::channel(false);
        let stale = async {
            cb.execute(async {
                let mut rx = release_rx.clone();
                let _ = rx.wait_for(|v| *v).await;
                Ok::<_, TestError>(1)
            })
            .await
        };
        let reopen_and_recover = async {
            tokio::task::yield_now().await;
            assert_eq!(cb.state(), CircuitState::HalfOpen);
            // Second trial fails, reopening; then the next half-open phase starts.
            let _ = fail(&cb).await;
            assert_eq!(cb.state(), CircuitState::Open);
            clock.advance(1_000);
            succeed(&cb).await.unwrap();
            release_tx.send(true).unwrap();
        };
        let (late, ()) = tokio::join!(stale, reopen_and_recover);
        assert!(late.is_ok());

        // Only one trial of the current phase has succeeded.
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_fallback_used_when_open() {
        let (cb, _) = breaker();
        cb.trip();
        let result = cb
            .execute_or_else(async { Ok::<_, TestError>("primary") }, || async {
                Ok("fallback")
            })
            .await
            .unwrap();
        assert_eq!(result, "fallback");
    }

    #[tokio::test]
    async fn test_events_emitted_on_transitions() {
        let (cb, clock) = breaker();
        let mut events = cb.subscribe();

        cb.trip();
        clock.advance(1_000);
        succeed(&cb).await.unwrap();
        cb.reset();

        let reasons: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| (e.previous_state, e.new_state, e.reason))
            .collect();
        assert_eq!(
            reasons,
            vec![
                (CircuitState::Closed, CircuitState::Open, TransitionReason::ManualTrip),
                (CircuitState::Open, CircuitState::HalfOpen, TransitionReason::TimeoutElapsed),
                (CircuitState::HalfOpen, CircuitState::Closed, TransitionReason::ManualReset),
            ]
        );
    }

    #[tokio::test]
    async fn test_reset_clears_counters() {
        let (cb, _) = breaker();
        trip_by_failures(&cb).await;
        cb.reset();
        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
        assert_eq!(snap.total_calls, 0);
        assert_eq!(snap.last_failure_timestamp, None);
    }
}
