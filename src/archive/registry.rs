//! Service registry.
//!
//! # Responsibilities
//! - Hold archive service adapters keyed by service id
//! - Preserve registration order (fallback ordering starts from it)
//! - Report which services are currently alive

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::timeout;

use crate::archive::service::ArchiveService;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A registered adapter and its id.
#[derive(Clone)]
pub struct ServiceEntry {
    pub id: String,
    pub service: Arc<dyn ArchiveService>,
}

impl std::fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceEntry")
            .field("id", &self.id)
            .field("name", &self.service.name())
            .finish()
    }
}

/// Mapping from service id to adapter.
pub struct ServiceRegistry {
    entries: RwLock<Vec<ServiceEntry>>,
    probe_timeout: Duration,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Bound on each availability probe; a probe that overruns counts as unavailable.
    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    /// Register `service` under `id`, replacing any previous adapter with that id.
    pub fn register(&self, id: impl Into<String>, service: Arc<dyn ArchiveService>) {
        let id = id.into();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries.iter_mut().find(|e| e.id == id) {
            tracing::debug!(service = %id, "Service already registered, replacing");
            existing.service = service;
        } else {
            tracing::debug!(service = %id, "Registered service");
            entries.push(ServiceEntry { id, service });
        }
    }

    pub fn unregister(&self, id: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ArchiveService>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|e| e.id == id)
            .map(|e| Arc::clone(&e.service))
    }

    /// All entries in registration order.
    pub fn all(&self) -> Vec<ServiceEntry> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.all().into_iter().map(|e| e.id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Entries whose availability probe says yes, in registration order.
    ///
    /// Probes run concurrently. A probe that errors or times out only marks
    /// that service unavailable.
    pub async fn get_available(&self) -> Vec<ServiceEntry> {
        let entries = self.all();
        let probes = entries.iter().map(|entry| async move {
            match timeout(self.probe_timeout, entry.service.is_available()).await {
                Ok(Ok(available)) => available,
                Ok(Err(e)) => {
                    tracing::debug!(service = %entry.id, error = %e, "Availability check failed");
                    false
                }
                Err(_) => {
                    tracing::debug!(service = %entry.id, "Availability check timed out");
                    false
                }
            }
        });
        let verdicts = join_all(probes).await;

        entries
            .into_iter()
            .zip(verdicts)
            .filter_map(|(entry, available)| available.then_some(entry))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::error::{ArchiveError, ErrorKind};
    use crate::archive::types::{ArchiveResult, DocumentRef};
    use async_trait::async_trait;

    struct Probe(Result<bool, ()>);

    #[async_trait]
    impl ArchiveService for Probe {
        fn name(&self) -> &str {
            "probe"
        }
        async fn is_available(&self) -> Result<bool, ArchiveError> {
            self.0
                .map_err(|_| ArchiveError::new(ErrorKind::ServerError, "probe exploded"))
        }
        async fn archive(&self, _: &[DocumentRef]) -> Result<Vec<ArchiveResult>, ArchiveError> {
            Ok(Vec::new())
        }
    }

    struct Hangs;

    #[async_trait]
    impl ArchiveService for Hangs {
        fn name(&self) -> &str {
            "hangs"
        }
        async fn is_available(&self) -> Result<bool, ArchiveError> {
            std::future::pending().await
        }
        async fn archive(&self, _: &[DocumentRef]) -> Result<Vec<ArchiveResult>, ArchiveError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_register_overwrites_in_place() {
        let registry = ServiceRegistry::new();
        registry.register("a", Arc::new(Probe(Ok(true))));
        registry.register("b", Arc::new(Probe(Ok(true))));
        registry.register("a", Arc::new(Probe(Ok(false))));
        assert_eq!(registry.ids(), vec!["a", "b"]);
        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_probe_is_just_unavailable() {
        let registry = ServiceRegistry::new();
        registry.register("up", Arc::new(Probe(Ok(true))));
        registry.register("down", Arc::new(Probe(Ok(false))));
        registry.register("broken", Arc::new(Probe(Err(()))));
        registry.register("up2", Arc::new(Probe(Ok(true))));

        let ids: Vec<_> = registry.get_available().await.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["up", "up2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_probe_times_out() {
        let registry = ServiceRegistry::new().with_probe_timeout(Duration::from_millis(50));
        registry.register("slow", Arc::new(Hangs));
        registry.register("up", Arc::new(Probe(Ok(true))));

        let ids: Vec<_> = registry.get_available().await.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["up"]);
    }
}
