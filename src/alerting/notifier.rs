//! Operator notifications for newly triggered alerts.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::alerting::rules::{Alert, Severity};

/// A transient, auto-dismissing message derived from an alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub headline: String,
    pub body: String,
    pub severity: Severity,
    /// How long the message stays up before closing itself.
    pub display_for: Duration,
}

impl Notification {
    pub fn for_alert(alert: &Alert) -> Self {
        let display_for = match alert.severity {
            Severity::Critical => Duration::from_secs(10),
            _ => Duration::from_secs(5),
        };
        Self {
            headline: format!("[{}] {}", alert.severity.as_str().to_uppercase(), alert.rule_name),
            body: alert.message.clone(),
            severity: alert.severity,
            display_for,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
}

/// Destination for notifications (desktop popup, chat hook, log).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification.severity {
            Severity::Critical | Severity::Error => tracing::error!(
                headline = %notification.headline,
                display_secs = notification.display_for.as_secs(),
                "{}",
                notification.body
            ),
            _ => tracing::warn!(
                headline = %notification.headline,
                display_secs = notification.display_for.as_secs(),
                "{}",
                notification.body
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::rules::default_rules;

    #[test]
    fn test_display_duration_scales_with_severity() {
        let rules = default_rules();
        let critical = rules.iter().find(|r| r.severity == Severity::Critical).unwrap();
        let warning = rules.iter().find(|r| r.severity == Severity::Warning).unwrap();

        let loud = Notification::for_alert(&Alert::from_rule(critical, 0, Some(0.0)));
        let quiet = Notification::for_alert(&Alert::from_rule(warning, 0, Some(0.0)));
        assert_eq!(loud.display_for, Duration::from_secs(10));
        assert_eq!(quiet.display_for, Duration::from_secs(5));
        assert_eq!(loud.headline, "[CRITICAL] All Services Unavailable");
    }
}
