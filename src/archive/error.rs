//! Archive error types.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resilience::ErrorFilter;

/// Failure categories reported by archive adapters and the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    RateLimited,
    AuthRequired,
    /// Site or publisher refuses archiving.
    Blocked,
    NotFound,
    ServerError,
    Timeout,
    InvalidUrl,
    CircuitOpen,
    CircuitHalfOpenBusy,
    Unknown,
}

impl ErrorKind {
    /// Stable code used as the `errorType` in metrics.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::RateLimited => "RATE_LIMIT",
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::Blocked => "BLOCKED",
            Self::NotFound => "NOT_FOUND",
            Self::ServerError => "SERVER_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::InvalidUrl => "INVALID_URL",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::CircuitHalfOpenBusy => "CIRCUIT_HALF_OPEN_BUSY",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether this kind says something about the service rather than the request.
    pub const fn trips_breaker(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError | Self::Timeout | Self::Unknown
        )
    }

    /// Best-effort classification of an HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::AuthRequired,
            404 | 410 => Self::NotFound,
            408 | 504 => Self::Timeout,
            429 => Self::RateLimited,
            451 => Self::Blocked,
            400..=499 => Self::InvalidUrl,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error raised by an archive adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ArchiveError {
    pub kind: ErrorKind,
    pub message: String,
    pub http_status: Option<u16>,
    /// Seconds the service asked us to wait, when it said so.
    pub retry_after: Option<u64>,
    pub retry_count: u32,
}

impl ArchiveError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            http_status: None,
            retry_after: None,
            retry_count: 0,
        }
    }

    /// Error derived from an HTTP response status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            http_status: Some(status),
            ..Self::new(ErrorKind::from_status(status), message)
        }
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Client-side statuses never count against a service.
    pub fn counts_toward_breaker(&self) -> bool {
        match self.http_status {
            Some(status) if (400..500).contains(&status) && status != 429 => false,
            Some(status) if status >= 500 => true,
            _ => self.kind.trips_breaker(),
        }
    }
}

/// Breaker filter that understands [`ArchiveError`]; unknown error types count.
pub fn archive_error_filter() -> ErrorFilter {
    Arc::new(|error: &(dyn std::error::Error + 'static)| {
        error
            .downcast_ref::<ArchiveError>()
            .map_or(true, ArchiveError::counts_toward_breaker)
    })
}

/// Caller mistakes rejected before any work is done.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("No items provided for archiving")]
    EmptyBatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ErrorKind::from_status(429), ErrorKind::RateLimited);
        assert_eq!(ErrorKind::from_status(403), ErrorKind::AuthRequired);
        assert_eq!(ErrorKind::from_status(503), ErrorKind::ServerError);
        assert_eq!(ErrorKind::from_status(400), ErrorKind::InvalidUrl);
    }

    #[test]
    fn test_breaker_filter_ignores_client_errors() {
        let filter = archive_error_filter();
        let blocked = ArchiveError::new(ErrorKind::Blocked, "publisher refuses");
        let not_found = ArchiveError::from_status(404, "gone");
        let server = ArchiveError::from_status(502, "bad gateway");
        let timeout = ArchiveError::new(ErrorKind::Timeout, "took too long");
        let throttled = ArchiveError::from_status(429, "slow down").with_retry_after(30);

        assert!(!filter(&blocked));
        assert!(!filter(&not_found));
        assert!(filter(&server));
        assert!(filter(&timeout));
        assert!(filter(&throttled));
        assert_eq!(throttled.retry_after, Some(30));
    }

    #[test]
    fn test_foreign_errors_count() {
        let filter = archive_error_filter();
        let io = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        assert!(filter(&io));
    }
}
