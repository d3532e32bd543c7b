//! Declarative alert rules.
//!
//! A rule is data: one metric, one comparison, one threshold. Adding a rule
//! never requires touching the evaluator.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Quantities a rule can watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    /// Successes / attempts over the rule window. No value without attempts.
    SuccessRate,
    /// Mean attempt latency over the rule window (ms). No value without attempts.
    AvgLatency,
    /// Failed attempts over the rule window.
    FailureCount,
    /// Archive operations currently in flight.
    ActiveOperations,
    /// 0 when the service (or, without a service, any service) is unhealthy, else 1.
    ServiceHealth,
    /// Services that may currently be tried.
    AvailableServices,
    /// Circuit breakers currently open.
    OpenCircuits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Operator {
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Lt => value < threshold,
            Self::Ge => value >= threshold,
            Self::Le => value <= threshold,
            Self::Eq => (value - threshold).abs() < f64::EPSILON,
            Self::Ne => (value - threshold).abs() >= f64::EPSILON,
        }
    }

    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Self::Info, Self::Warning, Self::Error, Self::Critical];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertCondition {
    pub metric: Metric,
    pub operator: Operator,
    pub threshold: f64,
    pub window_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
}

impl AlertCondition {
    pub fn new(metric: Metric, operator: Operator, threshold: f64, window_ms: u64) -> Self {
        Self {
            metric,
            operator,
            threshold,
            window_ms,
            service_id: None,
        }
    }

    pub fn for_service(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    /// A missing value never satisfies a condition.
    pub fn is_met(&self, value: Option<f64>) -> bool {
        value.is_some_and(|v| self.operator.evaluate(v, self.threshold))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub condition: AlertCondition,
    pub severity: Severity,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Minimum time between two triggers. Unset uses the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered: Option<u64>,
}

fn enabled_by_default() -> bool {
    true
}

impl AlertRule {
    pub fn new(id: &str, name: &str, condition: AlertCondition, severity: Severity) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            condition,
            severity,
            enabled: true,
            cooldown_ms: None,
            last_triggered: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_cooldown(mut self, cooldown_ms: u64) -> Self {
        self.cooldown_ms = Some(cooldown_ms);
        self
    }

    /// Whether the rule triggered less than `cooldown_ms` before `now`.
    pub fn in_cooldown(&self, now: u64, cooldown_ms: u64) -> bool {
        self.last_triggered
            .is_some_and(|last| now.saturating_sub(last) < cooldown_ms)
    }
}

/// Rules installed on every new alerting manager.
pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule::new(
            "high-failure-rate",
            "High Archive Failure Rate",
            AlertCondition::new(Metric::SuccessRate, Operator::Lt, 0.5, 3_600_000),
            Severity::Error,
        )
        .with_description("Archive success rate dropped below 50%")
        .with_cooldown(1_800_000),
        AlertRule::new(
            "service-unhealthy",
            "Service Unhealthy",
            AlertCondition::new(Metric::ServiceHealth, Operator::Eq, 0.0, 300_000),
            Severity::Warning,
        )
        .with_description("An archive service is unhealthy")
        .with_cooldown(600_000),
        AlertRule::new(
            "high-latency",
            "High Archive Latency",
            AlertCondition::new(Metric::AvgLatency, Operator::Gt, 60_000.0, 1_800_000),
            Severity::Warning,
        )
        .with_description("Average archive time exceeds 60 seconds")
        .with_cooldown(900_000),
        AlertRule::new(
            "all-services-down",
            "All Services Unavailable",
            AlertCondition::new(Metric::AvailableServices, Operator::Eq, 0.0, 60_000),
            Severity::Critical,
        )
        .with_description("No archive services are available")
        .with_cooldown(300_000),
        AlertRule::new(
            "circuit-breaker-open",
            "Circuit Breaker Tripped",
            AlertCondition::new(Metric::OpenCircuits, Operator::Gt, 0.0, 60_000),
            Severity::Warning,
        )
        .with_description("A service circuit breaker has opened")
        .with_cooldown(600_000),
    ]
}

/// Value a condition saw when its alert fired.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertContext {
    pub condition: AlertCondition,
    pub current_value: Option<f64>,
}

/// A triggered rule. Resolves at most once.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub timestamp: u64,
    pub message: String,
    pub context: AlertContext,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<u64>,
}

impl Alert {
    pub fn from_rule(rule: &AlertRule, timestamp: u64, current_value: Option<f64>) -> Self {
        let message = if rule.description.is_empty() {
            format!(
                "{:?} {} {}",
                rule.condition.metric,
                rule.condition.operator.symbol(),
                rule.condition.threshold
            )
        } else {
            rule.description.clone()
        };
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            severity: rule.severity,
            timestamp,
            message,
            context: AlertContext {
                condition: rule.condition.clone(),
                current_value,
            },
            resolved: false,
            resolved_at: None,
        }
    }

    /// Mark resolved. Returns false if it already was.
    pub fn resolve(&mut self, at: u64) -> bool {
        if self.resolved {
            return false;
        }
        self.resolved = true;
        self.resolved_at = Some(at);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operators() {
        assert!(Operator::Gt.evaluate(2.0, 1.0));
        assert!(Operator::Lt.evaluate(0.4, 0.5));
        assert!(Operator::Ge.evaluate(1.0, 1.0));
        assert!(Operator::Le.evaluate(1.0, 1.0));
        assert!(Operator::Eq.evaluate(0.0, 0.0));
        assert!(Operator::Ne.evaluate(1.0, 0.0));
        assert!(!Operator::Ne.evaluate(3.0, 3.0));
    }

    #[test]
    fn test_missing_value_never_meets() {
        let condition = AlertCondition::new(Metric::SuccessRate, Operator::Lt, 0.5, 1_000);
        assert!(!condition.is_met(None));
        assert!(condition.is_met(Some(0.2)));
    }

    #[test]
    fn test_rule_round_trips_through_json() {
        let json = r#"{
            "id": "ia-down",
            "name": "IA down",
            "condition": {"metric": "serviceHealth", "operator": "==", "threshold": 0, "windowMs": 60000, "serviceId": "ia"},
            "severity": "critical"
        }"#;
        let rule: AlertRule = serde_json::from_str(json).unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.condition.operator, Operator::Eq);
        assert_eq!(rule.condition.service_id.as_deref(), Some("ia"));
        assert_eq!(rule.cooldown_ms, None);
    }

    #[test]
    fn test_default_rules() {
        let rules = default_rules();
        let ids: Vec<_> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "high-failure-rate",
                "service-unhealthy",
                "high-latency",
                "all-services-down",
                "circuit-breaker-open"
            ]
        );
        assert!(rules.iter().all(|r| r.enabled && r.cooldown_ms.is_some()));
    }

    #[test]
    fn test_alert_resolves_once() {
        let rule = default_rules().remove(0);
        let mut alert = Alert::from_rule(&rule, 10, Some(0.1));
        assert!(alert.resolve(20));
        assert!(!alert.resolve(30));
        assert_eq!(alert.resolved_at, Some(20));
    }
}
