//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic tick (checker.rs, via lifecycle::ticker):
//!     → windowed per-service metrics + breaker state
//!     → ServiceHealth replaced wholesale
//!
//! Attempt recorded by the coordinator:
//!     → record_success / record_failure
//!     → immediate recompute of that one service
//!
//! Roll-up (status.rs):
//!     per-service statuses → SystemHealth
//! ```
//!
//! # Design Decisions
//! - Each computation supersedes the previous one; nothing is merged
//! - UNKNOWN services stay eligible for traffic
//! - An empty service set rolls up to UNHEALTHY

pub mod checker;
pub mod status;

pub use checker::HealthChecker;
pub use status::{HealthStatus, ServiceHealth, SystemHealth};
