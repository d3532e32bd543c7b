//! Start/stop periodic background loops.
//!
//! # Design Decisions
//! - `start()` while running is a no-op
//! - The first tick fires immediately
//! - Stop is only observed between ticks; a tick that has begun runs to completion

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

struct Running {
    stop: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Owner of at most one periodic loop.
pub struct PeriodicTask {
    name: &'static str,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for PeriodicTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicTask")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

impl PeriodicTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Mutex::new(None),
        }
    }

    /// Spawn the loop calling `tick` every `period`. Returns false if already running.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start<F, Fut>(&self, period: Duration, mut tick: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut running = self.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let (stop, mut stop_rx) = broadcast::channel(1);
        let name = self.name;
        let period = period.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(task = name, period_ms = period.as_millis() as u64, "Periodic task started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => tick().await,
                    _ = stop_rx.recv() => break,
                }
            }
            tracing::debug!(task = name, "Periodic task stopped");
        });

        *running = Some(Running { stop, handle });
        true
    }

    /// Signal the loop to exit after any in-progress tick. Returns false if not running.
    pub fn stop(&self) -> bool {
        match self.lock().take() {
            Some(running) => {
                let _ = running.stop.send(());
                true
            }
            None => false,
        }
    }

    /// Like [`stop`](Self::stop), but waits for the loop to exit.
    pub async fn stop_and_wait(&self) {
        let running = self.lock().take();
        if let Some(running) = running {
            let _ = running.stop.send(());
            if let Err(e) = running.handle.await {
                tracing::warn!(task = self.name, error = %e, "Periodic task ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().as_ref().is_some_and(|r| !r.handle.is_finished())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = running.stop.send(());
        }
    }
}
