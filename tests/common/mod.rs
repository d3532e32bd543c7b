//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use archive_sentinel::archive::{
    ArchiveError, ArchiveLink, ArchiveResult, ArchiveService, Document, DocumentRef, ErrorKind,
};
use archive_sentinel::clock::ManualClock;
use archive_sentinel::config::SentinelConfig;
use archive_sentinel::ArchiveSystem;

/// A host document that remembers what was written back to it.
#[derive(Debug, Default)]
pub struct TestDocument {
    pub id: String,
    pub url: Option<String>,
    pub doi: Option<String>,
    pub links: Mutex<Vec<ArchiveLink>>,
}

impl TestDocument {
    pub fn saved_links(&self) -> Vec<ArchiveLink> {
        self.links.lock().unwrap().clone()
    }
}

impl Document for TestDocument {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn url(&self) -> Option<String> {
        self.url.clone()
    }

    fn doi(&self) -> Option<String> {
        self.doi.clone()
    }

    fn save_archive_link(&self, link: &ArchiveLink) -> Result<(), ArchiveError> {
        self.links.lock().unwrap().push(link.clone());
        Ok(())
    }
}

pub fn document(id: &str, url: &str) -> Arc<TestDocument> {
    Arc::new(TestDocument {
        id: id.to_string(),
        url: Some(url.to_string()),
        ..TestDocument::default()
    })
}

pub fn as_ref(document: &Arc<TestDocument>) -> DocumentRef {
    document.clone()
}

/// What a scripted service does with each request.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Succeed with `{prefix}/{url}`.
    Succeed(String),
    /// Report a per-document failure.
    Fail(ErrorKind, String),
    /// Raise an adapter-level error.
    Raise(ErrorKind, String),
}

/// In-memory archive service with a scriptable outcome.
pub struct ScriptedService {
    pub name: String,
    behavior: Mutex<Behavior>,
    available: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    call_log: Option<Arc<Mutex<Vec<String>>>>,
}

impl ScriptedService {
    pub fn new(name: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self::build(name, behavior, None))
    }

    /// Service that appends its name to `log` on every archive call.
    pub fn logged(name: &str, behavior: Behavior, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self::build(name, behavior, Some(log.clone())))
    }

    pub fn succeeding(name: &str) -> Arc<Self> {
        Self::new(name, Behavior::Succeed(format!("https://{name}.example/web")))
    }

    pub fn failing(name: &str, kind: ErrorKind) -> Arc<Self> {
        Self::new(name, Behavior::Fail(kind, format!("{name} refused")))
    }

    fn build(name: &str, behavior: Behavior, call_log: Option<Arc<Mutex<Vec<String>>>>) -> Self {
        Self {
            name: name.to_string(),
            behavior: Mutex::new(behavior),
            available: AtomicBool::new(true),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
            call_log,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl ArchiveService for ScriptedService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> Result<bool, ArchiveError> {
        Ok(self.available.load(Ordering::SeqCst))
    }

    async fn archive(&self, documents: &[DocumentRef]) -> Result<Vec<ArchiveResult>, ArchiveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.call_log {
            log.lock().unwrap().push(self.name.clone());
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let behavior = self.behavior.lock().unwrap().clone();
        let mut results = Vec::with_capacity(documents.len());
        for document in documents {
            let url = document.url().unwrap_or_default();
            match &behavior {
                Behavior::Succeed(prefix) => {
                    results.push(ArchiveResult::success(document.clone(), &self.name, format!("{prefix}/{url}")))
                }
                Behavior::Fail(kind, message) => results.push(
                    ArchiveResult::failure(document.clone(), Some(&self.name), message.clone()).with_kind(*kind),
                ),
                Behavior::Raise(kind, message) => return Err(ArchiveError::new(*kind, message.clone())),
            }
        }
        Ok(results)
    }
}

/// A system on a manual clock with the given fallback order.
pub fn system(fallback_order: &[&str]) -> (ArchiveSystem, Arc<ManualClock>) {
    let mut config = SentinelConfig::default();
    config.archive.fallback_order = fallback_order.iter().map(|s| s.to_string()).collect();
    system_with(config)
}

pub fn system_with(config: SentinelConfig) -> (ArchiveSystem, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    (ArchiveSystem::new(config, clock.clone()), clock)
}
