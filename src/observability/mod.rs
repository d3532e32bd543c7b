//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms via the metrics facade)
//!     → trace_log.rs (closed archive.* spans kept in memory)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint (optional)
//!     → Dashboard export
//! ```

pub mod logging;
pub mod metrics;
pub mod trace_log;

pub use trace_log::{SpanLog, SpanRecord, SpanStatus};
