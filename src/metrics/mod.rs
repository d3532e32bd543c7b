//! Metrics subsystem.
//!
//! # Data Flow
//! ```text
//! Coordinator attempt finished:
//!     → registry.rs (counters, latency timer, bounded history)
//!     → observability::metrics (facade mirror for Prometheus)
//!
//! Consumers:
//!     → health checker (windowed per-service figures)
//!     → alerting (snapshot and windowed global figures)
//!     → dashboard (aggregated stats, recent history)
//! ```
//!
//! # Design Decisions
//! - History is filtered by event timestamp, never by duration
//! - Percentiles cover only the retained sample window

pub mod primitives;
pub mod registry;
pub mod types;

pub use primitives::{Counter, Gauge, Histogram, Timer};
pub use registry::{MetricsRegistry, OperationGuard};
pub use types::{
    AggregatedStats, ArchiveAttemptRecord, MetricsSnapshot, ServiceBreakdown, ServiceMetrics,
    StatsPeriod,
};
