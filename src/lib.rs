//! Archive Sentinel
//!
//! Resilience and observability core for archiving documents' URLs with
//! external web-archiving services.
//!
//! # Architecture Overview
//!
//! ```text
//!   document(s)
//!       │
//!       ▼
//!  ┌────────────────────┐    ┌──────────────────┐    ┌────────────────────┐
//!  │ ArchiveCoordinator │───▶│ ServiceRegistry  │───▶│ ArchiveService     │
//!  │ (fallback order)   │    │ (availability)   │    │ (vendor adapter)   │
//!  └─────────┬──────────┘    └──────────────────┘    └─────────▲──────────┘
//!            │                                                 │
//!            │          ┌───────────────────────┐              │
//!            └─────────▶│ CircuitBreakerManager │──────────────┘
//!                       └───────────┬───────────┘
//!                                   │ attempts / transitions
//!                                   ▼
//!  ┌─────────────────┐    ┌──────────────────┐    ┌──────────────────┐
//!  │ MetricsRegistry │───▶│  HealthChecker   │───▶│ AlertingManager  │
//!  └─────────────────┘    └──────────────────┘    └──────────────────┘
//!            │                     │                       │
//!            └─────────────────────┴───────────────────────┘
//!                                  ▼
//!                             Dashboard
//! ```

// Core
pub mod archive;
pub mod cache;
pub mod clock;
pub mod config;

// Resilience and monitoring
pub mod alerting;
pub mod health;
pub mod metrics;
pub mod resilience;

// Reporting and cross-cutting concerns
pub mod dashboard;
pub mod lifecycle;
pub mod observability;

pub use archive::{ArchiveCoordinator, ArchiveService, Document, DocumentRef};
pub use config::SentinelConfig;
pub use lifecycle::{ArchiveSystem, Shutdown};
