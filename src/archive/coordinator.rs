//! Archive coordination across services.
//!
//! # Responsibilities
//! - Archive documents against one named service or via ordered fallback
//! - Guard every service call with its circuit breaker
//! - Record each attempt in metrics and forward it to the health checker
//! - Write archived links back onto documents
//!
//! # Design Decisions
//! - Documents in a batch are processed strictly one after another
//! - Per-call failures become per-document results; only an empty batch is an error
//! - No retries here; fallback moves on to the next service instead
//! - Successful links are cached per service and URL, so a duplicate
//!   request (even a concurrent one) reuses the first result

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{broadcast, mpsc};
use tracing::Instrument;
use uuid::Uuid;

use crate::archive::error::{ArchiveError, CoordinatorError, ErrorKind};
use crate::archive::registry::{ServiceEntry, ServiceRegistry};
use crate::archive::service::ArchiveService;
use crate::archive::types::{resolve_target_url, ArchiveLink, ArchiveResult, DocumentRef};
use crate::archive::url_filter::should_auto_archive;
use crate::cache::{AsyncCache, Lookup};
use crate::clock::SharedClock;
use crate::config::ArchiveConfig;
use crate::health::HealthChecker;
use crate::metrics::{ArchiveAttemptRecord, MetricsRegistry};
use crate::resilience::{CircuitBreakerManager, CircuitError};

pub struct ArchiveCoordinator {
    registry: Arc<ServiceRegistry>,
    breakers: Arc<CircuitBreakerManager>,
    metrics: Arc<MetricsRegistry>,
    health: Arc<HealthChecker>,
    links: AsyncCache<String>,
    preferences: ArcSwap<ArchiveConfig>,
    clock: SharedClock,
}

impl std::fmt::Debug for ArchiveCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveCoordinator")
            .field("services", &self.registry.len())
            .field("preferences", &self.preferences.load_full())
            .finish()
    }
}

impl ArchiveCoordinator {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        breakers: Arc<CircuitBreakerManager>,
        metrics: Arc<MetricsRegistry>,
        health: Arc<HealthChecker>,
        preferences: ArchiveConfig,
        clock: SharedClock,
    ) -> Self {
        let links = AsyncCache::new(preferences.cache_max_entries, preferences.cache_ttl_ms, clock.clone());
        Self {
            registry,
            breakers,
            metrics,
            health,
            links,
            preferences: ArcSwap::from_pointee(preferences),
            clock,
        }
    }

    /// Current archive preferences.
    pub fn preferences(&self) -> Arc<ArchiveConfig> {
        self.preferences.load_full()
    }

    /// Swap in new preferences. Cache sizing keeps its original values.
    pub fn update_preferences(&self, preferences: ArchiveConfig) {
        tracing::info!(
            default_service = %preferences.default_service,
            fallback_order = ?preferences.fallback_order,
            auto_archive = preferences.auto_archive,
            "Archive preferences updated"
        );
        self.preferences.store(Arc::new(preferences));
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Archive each document, against `service_id` or by fallback.
    ///
    /// Always yields one result per document, in input order.
    pub async fn archive_items(
        &self,
        documents: &[DocumentRef],
        service_id: Option<&str>,
    ) -> Result<Vec<ArchiveResult>, CoordinatorError> {
        if documents.is_empty() {
            return Err(CoordinatorError::EmptyBatch);
        }

        let span = tracing::info_span!(
            "archive.batch",
            batch_id = %Uuid::new_v4(),
            documents = documents.len(),
            service = service_id.unwrap_or("fallback"),
            succeeded = tracing::field::Empty,
        );

        async {
            let mut results = Vec::with_capacity(documents.len());
            for document in documents {
                let result = self.archive_document(document, service_id).await;
                if !result.success {
                    tracing::debug!(
                        document = %document.id(),
                        error = result.error.as_deref().unwrap_or(""),
                        "Archiving failed"
                    );
                }
                results.push(result);
            }
            let succeeded = results.iter().filter(|r| r.success).count();
            tracing::Span::current().record("succeeded", succeeded);
            Ok::<_, CoordinatorError>(results)
        }
        .instrument(span)
        .await
    }

    /// Archive a single document.
    pub async fn archive_document(&self, document: &DocumentRef, service_id: Option<&str>) -> ArchiveResult {
        let Some(url) = resolve_target_url(document.as_ref()) else {
            return ArchiveResult::failure(document.clone(), service_id, "Item has no URL to archive")
                .with_kind(ErrorKind::InvalidUrl);
        };

        match service_id {
            Some(id) => match self.registry.get(id) {
                Some(service) => self.archive_with_service(id, &service, document, &url).await,
                None => ArchiveResult::failure(document.clone(), Some(id), format!("Service {id} not found"))
                    .with_kind(ErrorKind::NotFound),
            },
            None => self.archive_with_fallback(document, &url).await,
        }
    }

    /// Archive a newly added document with the default service.
    ///
    /// Returns `None` when auto-archive is off, the URL is local or not
    /// http(s), or the default service is not registered. Failures are
    /// logged, never raised.
    pub async fn auto_archive(&self, document: &DocumentRef) -> Option<ArchiveResult> {
        let preferences = self.preferences.load_full();
        if !preferences.auto_archive {
            return None;
        }
        let url = resolve_target_url(document.as_ref())?;
        if !should_auto_archive(&url) {
            tracing::debug!(document = %document.id(), url = %url, "Skipping auto-archive for local URL");
            return None;
        }

        let service_id = preferences.default_service.as_str();
        let Some(service) = self.registry.get(service_id) else {
            tracing::warn!(
                document = %document.id(),
                service = %service_id,
                "Auto-archive skipped: default service not registered"
            );
            return None;
        };

        let result = self.archive_with_service(service_id, &service, document, &url).await;
        if result.success {
            tracing::info!(
                document = %document.id(),
                service = %service_id,
                archived_url = result.archived_url.as_deref().unwrap_or(""),
                "Auto-archived document"
            );
        } else {
            tracing::warn!(
                document = %document.id(),
                service = %service_id,
                error = result.error.as_deref().unwrap_or(""),
                "Auto-archive failed"
            );
        }
        Some(result)
    }

    /// Auto-archive every document from `feed` until it closes or shutdown fires.
    pub async fn run_auto_archive(
        &self,
        mut feed: mpsc::Receiver<DocumentRef>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::info!("Auto-archive worker starting");
        loop {
            tokio::select! {
                next = feed.recv() => match next {
                    Some(document) => {
                        self.auto_archive(&document).await;
                    }
                    None => break,
                },
                _ = shutdown.recv() => {
                    tracing::info!("Auto-archive worker received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn archive_with_fallback(&self, document: &DocumentRef, url: &str) -> ArchiveResult {
        let preferences = self.preferences.load_full();
        let available: Vec<ServiceEntry> = self
            .registry
            .get_available()
            .await
            .into_iter()
            .filter(|entry| preferences.service(&entry.id).enabled)
            .collect();
        if available.is_empty() {
            return ArchiveResult::failure(document.clone(), None, "No archiving services available");
        }

        let ordered = order_services(available, &preferences.fallback_order);
        let mut errors = Vec::with_capacity(ordered.len());
        for entry in &ordered {
            let result = self.archive_with_service(&entry.id, &entry.service, document, url).await;
            if result.success {
                return result;
            }
            errors.push(format!(
                "{}: {}",
                entry.id,
                result.error.as_deref().unwrap_or("unknown error")
            ));
        }

        ArchiveResult::failure(
            document.clone(),
            None,
            format!("All archive services failed:\n{}", errors.join("\n")),
        )
    }

    async fn archive_with_service(
        &self,
        service_id: &str,
        service: &Arc<dyn ArchiveService>,
        document: &DocumentRef,
        url: &str,
    ) -> ArchiveResult {
        let span = tracing::info_span!(
            "archive.attempt",
            service = %service_id,
            document = %document.id(),
            url = %url,
            success = tracing::field::Empty,
            from_cache = tracing::field::Empty,
        );

        async {
            if !self.preferences.load().service(service_id).enabled {
                return ArchiveResult::failure(document.clone(), Some(service_id), format!("Service {service_id} is disabled"))
                    .with_kind(ErrorKind::Blocked);
            }

            let key = format!("{service_id}:{url}");
            let outcome = self
                .links
                .get_or_try_compute(&key, || self.call_service(service_id, service, document, url))
                .await;

            let span = tracing::Span::current();
            let mut result = match outcome {
                Ok((archived_url, origin)) => {
                    let from_cache = origin == Lookup::Shared;
                    if from_cache {
                        self.record_cache_hit(service_id, url);
                    }
                    let mut result = ArchiveResult::success(document.clone(), service_id, archived_url);
                    result.from_cache = from_cache;
                    result
                }
                Err(error) => ArchiveResult::failure(document.clone(), Some(service_id), error.message.clone())
                    .with_kind(error.kind)
                    .with_retries(error.retry_count),
            };
            span.record("success", result.success);
            span.record("from_cache", result.from_cache);

            if let Some(archived_url) = result.archived_url.clone() {
                let link = ArchiveLink::new(service_id, url, &archived_url);
                if let Err(e) = document.save_archive_link(&link) {
                    tracing::warn!(document = %document.id(), error = %e, "Failed to save archive link");
                    result = result.with_message(format!("Archived, but saving the link failed: {e}"));
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    /// One breaker-guarded, time-bounded call to an adapter.
    async fn call_service(
        &self,
        service_id: &str,
        service: &Arc<dyn ArchiveService>,
        document: &DocumentRef,
        url: &str,
    ) -> Result<String, ArchiveError> {
        let _operation = self.metrics.start_operation();
        let timeout_ms = self.preferences.load().service(service_id).timeout_ms;
        let started = self.clock.now_millis();

        let call = invoke(service.as_ref(), document, Duration::from_millis(timeout_ms));
        let outcome = self.breakers.execute(service_id, call).await;
        let finished = self.clock.now_millis();
        let duration = finished.saturating_sub(started);

        match outcome {
            Ok(archived) => {
                self.metrics.record_archive(
                    ArchiveAttemptRecord::success(service_id, url, duration, finished)
                        .with_retries(archived.retry_count),
                );
                self.health.record_success(service_id);
                Ok(archived.url)
            }
            Err(CircuitError::Inner(error)) => {
                self.metrics.record_archive(
                    ArchiveAttemptRecord::failure(service_id, url, error.kind.code(), duration, finished)
                        .with_http_status(error.http_status)
                        .with_retries(error.retry_count),
                );
                self.health.record_failure(service_id, Some(&error.message));
                Err(error)
            }
            // Rejected without calling the service; nothing to record.
            Err(rejection) => {
                let kind = match rejection {
                    CircuitError::Open(_) => ErrorKind::CircuitOpen,
                    _ => ErrorKind::CircuitHalfOpenBusy,
                };
                tracing::debug!(service = %service_id, reason = %rejection, "Circuit breaker rejected call");
                Err(ArchiveError::new(kind, rejection.to_string()))
            }
        }
    }

    fn record_cache_hit(&self, service_id: &str, url: &str) {
        let now = self.clock.now_millis();
        self.metrics
            .record_archive(ArchiveAttemptRecord::success(service_id, url, 0, now).cached());
        self.health.record_success(service_id);
        tracing::debug!(service = %service_id, url = %url, "Archive link served from cache");
    }
}

struct Archived {
    url: String,
    retry_count: u32,
}

/// Send one document to an adapter and extract its archived URL.
async fn invoke(
    service: &dyn ArchiveService,
    document: &DocumentRef,
    timeout: Duration,
) -> Result<Archived, ArchiveError> {
    let results = tokio::time::timeout(timeout, service.archive(std::slice::from_ref(document)))
        .await
        .map_err(|_| {
            ArchiveError::new(
                ErrorKind::Timeout,
                format!("Archive request timed out after {}ms", timeout.as_millis()),
            )
        })??;

    let result = results
        .into_iter()
        .next()
        .ok_or_else(|| ArchiveError::new(ErrorKind::Unknown, "No result returned from service"))?;
    match (result.success, result.archived_url.clone()) {
        (true, Some(url)) => Ok(Archived {
            url,
            retry_count: result.retry_count,
        }),
        (true, None) => Err(ArchiveError::new(
            ErrorKind::Unknown,
            "Service reported success without an archived URL",
        )),
        (false, _) => Err(result.to_error()),
    }
}

/// Preferred services first, in preference order, then the rest in their original order.
pub fn order_services(available: Vec<ServiceEntry>, preference: &[String]) -> Vec<ServiceEntry> {
    let mut remaining = available;
    let mut ordered = Vec::with_capacity(remaining.len());
    for id in preference {
        if let Some(pos) = remaining.iter().position(|entry| &entry.id == id) {
            ordered.push(remaining.remove(pos));
        }
    }
    ordered.extend(remaining);
    ordered
}
