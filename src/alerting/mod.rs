//! Rule-based alerting.
//!
//! # Data Flow
//! ```text
//! PeriodicTask tick ("alert-evaluation")
//!     → manager.rs (read metrics / health / breaker counts per rule)
//!     → rules.rs (operator dispatch against the threshold)
//!     → Alert appended to the bounded log
//!     → notifier.rs (severity-scaled notification)
//! ```

pub mod manager;
pub mod notifier;
pub mod rules;

pub use manager::{AlertFilter, AlertStats, AlertingManager};
pub use notifier::{LogNotifier, Notification, Notifier, NotifyError};
pub use rules::{default_rules, Alert, AlertCondition, AlertContext, AlertRule, Metric, Operator, Severity};
