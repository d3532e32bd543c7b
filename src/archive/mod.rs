//! Archive subsystem.
//!
//! # Data Flow
//! ```text
//! archive_items(documents, service?) / auto_archive(document):
//!     → coordinator.rs (resolve URL, pick service or fallback order)
//!     → registry.rs (adapter lookup, concurrent availability probes)
//!     → resilience::CircuitBreakerManager (guard the call)
//!     → service.rs adapter (vendor request, outside this crate)
//!     → metrics + health (record the attempt)
//!     → types.rs Document::save_archive_link (write back)
//! ```

pub mod coordinator;
pub mod error;
pub mod registry;
pub mod service;
pub mod types;
pub mod url_filter;

pub use coordinator::ArchiveCoordinator;
pub use error::{archive_error_filter, ArchiveError, CoordinatorError, ErrorKind};
pub use registry::{ServiceEntry, ServiceRegistry};
pub use service::ArchiveService;
pub use types::{
    resolve_target_url, ArchiveLink, ArchiveResult, ArchiveSummary, BatchOutcome, Document, DocumentRef,
};
pub use url_filter::should_auto_archive;
