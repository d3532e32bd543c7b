//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → SentinelConfig (validated, immutable)
//!     → sections handed to each component at construction
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → archive preferences swapped atomically (arc-swap)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only archive preferences hot-reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::AlertingConfig;
pub use schema::ArchiveConfig;
pub use schema::CircuitBreakerConfig;
pub use schema::HealthConfig;
pub use schema::MetricsConfig;
pub use schema::ObservabilityConfig;
pub use schema::SentinelConfig;
pub use schema::ServiceSettings;
