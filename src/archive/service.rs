//! Archive service adapter contract.
//!
//! Vendor adapters (Internet Archive, Archive.today, Perma.cc, ...) live
//! outside this crate and plug in through [`ArchiveService`].

use async_trait::async_trait;

use crate::archive::error::ArchiveError;
use crate::archive::types::{ArchiveResult, DocumentRef};

#[async_trait]
pub trait ArchiveService: Send + Sync {
    /// Human-readable service name.
    fn name(&self) -> &str;

    /// Liveness probe. An `Err` is treated as "unavailable".
    async fn is_available(&self) -> Result<bool, ArchiveError>;

    /// Archive a batch, yielding one result per document.
    ///
    /// Any retry policy is internal to the adapter.
    async fn archive(&self, documents: &[DocumentRef]) -> Result<Vec<ArchiveResult>, ArchiveError>;
}
