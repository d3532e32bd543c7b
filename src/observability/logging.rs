//! Structured logging.
//!
//! # Responsibilities
//! - Install the global tracing subscriber once, at process start
//! - Attach the span recorder so archive spans can be exported
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level
//! - JSON format for production, pretty format for development

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;
use crate::observability::trace_log::SpanLog;

/// Filter from `RUST_LOG`, else `archive_sentinel=<log_level>`.
pub fn env_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("archive_sentinel={}", config.log_level).into())
}

/// Install the global subscriber. Returns an error if one is already set.
pub fn init(config: &ObservabilityConfig, spans: SpanLog) -> Result<(), tracing_subscriber::util::TryInitError> {
    let registry = tracing_subscriber::registry()
        .with(env_filter(config))
        .with(spans);

    if config.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    }
}
