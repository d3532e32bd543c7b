//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Archive call to a service:
//!     → breaker_manager.rs (look up or create the service's breaker)
//!     → circuit_breaker.rs (admit, run, count the outcome, maybe transition)
//!     → StateChangeEvent broadcast to health / alerting subscribers
//! ```
//!
//! # Design Decisions
//! - Per-service circuit breaker (not global)
//! - Fail fast in Open state; no background timers, recovery is probed lazily
//! - Retries are an adapter concern; this layer only guards and falls back

pub mod breaker_manager;
pub mod circuit_breaker;

pub use breaker_manager::CircuitBreakerManager;
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerState, CircuitError, CircuitState, ErrorFilter, StateChangeEvent,
    TransitionReason,
};
