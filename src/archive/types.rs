//! Documents, results and summaries exchanged with the host application.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::archive::error::{ArchiveError, ErrorKind};

/// A document owned by the host reference manager.
///
/// The core only reads identifying fields and writes back archive links.
pub trait Document: Send + Sync + fmt::Debug {
    /// Host identifier, used in logs.
    fn id(&self) -> String;

    fn url(&self) -> Option<String>;

    fn doi(&self) -> Option<String>;

    fn title(&self) -> Option<String> {
        None
    }

    /// Persist the archived URL and an explanatory note on the document.
    fn save_archive_link(&self, link: &ArchiveLink) -> Result<(), ArchiveError>;
}

/// Shared handle to a host document.
pub type DocumentRef = Arc<dyn Document>;

/// The URL that should be archived for a document: a DOI resolver link wins
/// over the plain URL.
pub fn resolve_target_url(document: &dyn Document) -> Option<String> {
    if let Some(doi) = document.doi().filter(|d| !d.trim().is_empty()) {
        return Some(format!("https://doi.org/{}", doi.trim()));
    }
    document.url().filter(|u| !u.trim().is_empty())
}

/// What gets written back to a document after a successful archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveLink {
    pub service: String,
    pub original_url: String,
    pub archived_url: String,
    pub note: String,
}

impl ArchiveLink {
    pub fn new(service: &str, original_url: &str, archived_url: &str) -> Self {
        Self {
            service: service.to_string(),
            original_url: original_url.to_string(),
            archived_url: archived_url.to_string(),
            note: format!("Archived {} via {}: {}", original_url, service, archived_url),
        }
    }
}

/// One record per document from an archive call.
#[derive(Debug, Clone)]
pub struct ArchiveResult {
    pub document: DocumentRef,
    pub success: bool,
    pub archived_url: Option<String>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub service: Option<String>,
    pub from_cache: bool,
    /// Retries the adapter made internally before this outcome.
    pub retry_count: u32,
}

impl ArchiveResult {
    pub fn success(document: DocumentRef, service: &str, archived_url: impl Into<String>) -> Self {
        Self {
            document,
            success: true,
            archived_url: Some(archived_url.into()),
            message: None,
            error: None,
            error_kind: None,
            service: Some(service.to_string()),
            from_cache: false,
            retry_count: 0,
        }
    }

    pub fn failure(document: DocumentRef, service: Option<&str>, error: impl Into<String>) -> Self {
        Self {
            document,
            success: false,
            archived_url: None,
            message: None,
            error: Some(error.into()),
            error_kind: None,
            service: service.map(str::to_string),
            from_cache: false,
            retry_count: 0,
        }
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.error_kind = Some(kind);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// The failure as an [`ArchiveError`], for breaker accounting.
    pub fn to_error(&self) -> ArchiveError {
        ArchiveError::new(
            self.error_kind.unwrap_or(ErrorKind::Unknown),
            self.error.clone().unwrap_or_else(|| "Archive failed".to_string()),
        )
        .with_retries(self.retry_count)
    }
}

/// Outcome of a user-initiated batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    Success,
    PartialSuccess,
    Failure,
}

/// Counts reported back to the user after an explicit archive request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
    pub outcome: BatchOutcome,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl ArchiveSummary {
    pub fn from_results(results: &[ArchiveResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;
        let errors = results
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {}", r.document.id(), e)))
            .collect();
        let outcome = match (succeeded, failed) {
            (_, 0) => BatchOutcome::Success,
            (0, _) => BatchOutcome::Failure,
            _ => BatchOutcome::PartialSuccess,
        };
        Self {
            outcome,
            succeeded,
            failed,
            errors,
        }
    }

    /// Single line shown to the user.
    pub fn headline(&self) -> String {
        match self.outcome {
            BatchOutcome::Success => format!("Archived {} item(s)", self.succeeded),
            BatchOutcome::PartialSuccess => format!(
                "Archived {} of {} item(s); {} failed",
                self.succeeded,
                self.succeeded + self.failed,
                self.failed
            ),
            BatchOutcome::Failure => format!("Failed to archive {} item(s)", self.failed),
        }
    }
}
