//! Half-open admission under concurrent callers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use archive_sentinel::clock::ManualClock;
use archive_sentinel::config::CircuitBreakerConfig;
use archive_sentinel::resilience::{CircuitBreaker, CircuitError, CircuitState};

#[derive(Debug, thiserror::Error)]
#[error("upstream failed")]
struct Upstream;

fn config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 1,
        success_threshold: 2,
        timeout_ms: 5_000,
        volume_threshold: 1,
    }
}

/// Trip the breaker, let the timeout pass, and fire `callers` concurrent
/// calls that block until `gate` has permits.
async fn concurrent_trials(
    callers: usize,
    succeed: bool,
) -> (Arc<CircuitBreaker>, Vec<Result<(), CircuitError<Upstream>>>) {
    let clock = Arc::new(ManualClock::new(0));
    let breaker = Arc::new(CircuitBreaker::new("ia", config(), clock.clone()));
    breaker.trip();
    clock.advance(5_000);

    let gate = Arc::new(Semaphore::new(0));
    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let breaker = breaker.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                breaker
                    .execute(async move {
                        let _permit = gate.acquire().await.map_err(|_| Upstream)?;
                        if succeed {
                            Ok::<(), Upstream>(())
                        } else {
                            Err(Upstream)
                        }
                    })
                    .await
            })
        })
        .collect();

    // Let every caller reach admission before any trial finishes.
    tokio::time::sleep(Duration::from_millis(50)).await;
    gate.add_permits(callers);

    let mut results = Vec::with_capacity(callers);
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    (breaker, results)
}

#[tokio::test]
async fn test_half_open_admits_at_most_success_threshold() {
    let (breaker, results) = concurrent_trials(6, true).await;

    let admitted = results.iter().filter(|r| r.is_ok()).count();
    let busy = results
        .iter()
        .filter(|r| matches!(r, Err(CircuitError::HalfOpenBusy(_))))
        .count();
    assert_eq!(admitted, 2);
    assert_eq!(busy, 4);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.snapshot().failure_count, 0);
}

#[tokio::test]
async fn test_failed_trial_reopens() {
    let (breaker, results) = concurrent_trials(3, false).await;

    let failed = results
        .iter()
        .filter(|r| matches!(r, Err(CircuitError::Inner(Upstream))))
        .count();
    assert!(failed >= 1);
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(results.iter().all(|r| r.is_err()));
}

#[tokio::test]
async fn test_concurrent_failures_open_once() {
    let clock = Arc::new(ManualClock::new(0));
    let breaker = Arc::new(CircuitBreaker::new(
        "ia",
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 1,
            timeout_ms: 1_000,
            volume_threshold: 3,
        },
        clock,
    ));
    let mut events = breaker.subscribe();

    let calls = (0..10).map(|_| {
        let breaker = breaker.clone();
        async move { breaker.execute(async { Err::<(), _>(Upstream) }).await }
    });
    let results = futures_util::future::join_all(calls).await;

    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(results.iter().any(|r| matches!(r, Err(CircuitError::Open(_)))));

    let first = events.try_recv().unwrap();
    assert_eq!(first.new_state, CircuitState::Open);
    assert!(events.try_recv().is_err(), "only one transition expected");
}
