//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     SentinelConfig → ArchiveSystem::new → register services → start()
//!
//! Background loops (ticker.rs):
//!     health checks and alert evaluation on independent intervals
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGINT/SIGTERM → stop loops → broadcast shutdown → join workers
//! ```
//!
//! # Design Decisions
//! - Loops are started and stopped explicitly; no pause/resume
//! - A tick that has begun runs to completion

pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod ticker;

pub use shutdown::Shutdown;
pub use startup::ArchiveSystem;
pub use ticker::PeriodicTask;
