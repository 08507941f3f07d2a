//! Backend health record and alert rules.
//!
//! # States
//! - Healthy: backend receives traffic
//! - Degraded: backend receives traffic, alerts are active
//! - Failed: backend excluded from selection
//!
//! # State Transitions
//! ```text
//! any → Failed:   consecutive failures >= failure_escalation_threshold
//! any → Degraded: consecutive failures >= failure_alert_threshold,
//!                 or a low success rate alert while Healthy
//! any → Healthy:  consecutive successes >= recovery_threshold
//! ```
//!
//! # Alerts
//! - Consecutive failures: Warning at the alert threshold, Error at escalation
//! - Low success rate over the recent window (after enough probes): Warning
//! - High mean latency over the last 10 probes: Warning
//! - A recovery streak resolves every active alert
//!
//! # Design Decisions
//! - Hysteresis prevents flapping; between thresholds the status holds
//! - New alerts are not raised during a recovery streak

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backends::BackendStatus;
use crate::config::HealthCheckConfig;
use crate::jobs::types::now_ms;

const LATENCY_ALERT_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ConsecutiveFailures,
    LowSuccessRate,
    HighLatency,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::ConsecutiveFailures => "consecutive_failures",
            AlertKind::LowSuccessRate => "low_success_rate",
            AlertKind::HighLatency => "high_latency",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub raised_at_ms: u64,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}: {}", self.severity, self.kind.as_str(), self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum AlertChange {
    Raised(Alert),
    Escalated(Alert),
    Resolved(Alert),
}

/// One probe result.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSample {
    pub healthy: bool,
    pub latency: Duration,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub p50_ms: u64,
    pub p90_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

/// Thresholds taken from [`HealthCheckConfig`].
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    pub history_size: usize,
    pub success_rate_window: usize,
    pub min_probes_for_rate: usize,
    pub low_success_rate: f64,
    pub failure_alert_threshold: u32,
    pub failure_escalation_threshold: u32,
    pub recovery_threshold: u32,
    pub latency_alert: Duration,
}

impl From<&HealthCheckConfig> for AlertPolicy {
    fn from(config: &HealthCheckConfig) -> Self {
        Self {
            history_size: config.history_size.max(1),
            success_rate_window: config.success_rate_window.max(1),
            min_probes_for_rate: config.min_probes_for_rate,
            low_success_rate: config.low_success_rate,
            failure_alert_threshold: config.failure_alert_threshold.max(1),
            failure_escalation_threshold: config
                .failure_escalation_threshold
                .max(config.failure_alert_threshold),
            recovery_threshold: config.recovery_threshold.max(1),
            latency_alert: Duration::from_millis(config.latency_alert_ms),
        }
    }
}

/// Rolling probe history for one backend instance.
#[derive(Debug, Clone)]
pub struct HealthRecord {
    policy: AlertPolicy,
    samples: VecDeque<ProbeSample>,
    total_checks: u64,
    total_failures: u64,
    consecutive_failures: u32,
    consecutive_successes: u32,
    status: BackendStatus,
    alerts: BTreeMap<AlertKind, Alert>,
    last_probe_ms: Option<u64>,
    last_error: Option<String>,
}

/// Point-in-time summary of a health record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub status: BackendStatus,
    pub success_rate: f64,
    pub total_checks: u64,
    pub total_failures: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub latency: LatencyPercentiles,
    pub active_alerts: usize,
    pub alerts: Vec<Alert>,
    pub last_probe_ms: Option<u64>,
    pub last_error: Option<String>,
}

impl HealthRecord {
    pub fn new(config: &HealthCheckConfig) -> Self {
        Self {
            policy: AlertPolicy::from(config),
            samples: VecDeque::new(),
            total_checks: 0,
            total_failures: 0,
            consecutive_failures: 0,
            consecutive_successes: 0,
            status: BackendStatus::Healthy,
            alerts: BTreeMap::new(),
            last_probe_ms: None,
            last_error: None,
        }
    }

    /// Add a probe result and apply the alert rules.
    pub fn record(&mut self, sample: ProbeSample) -> Vec<AlertChange> {
        self.total_checks += 1;
        self.last_probe_ms = Some(now_ms());
        if sample.healthy {
            self.consecutive_successes += 1;
            self.consecutive_failures = 0;
        } else {
            self.total_failures += 1;
            self.consecutive_failures += 1;
            self.consecutive_successes = 0;
            self.last_error = sample.error.clone();
        }
        self.samples.push_back(sample);
        while self.samples.len() > self.policy.history_size {
            self.samples.pop_front();
        }

        let mut changes = Vec::new();
        if self.consecutive_successes >= self.policy.recovery_threshold {
            let resolved = std::mem::take(&mut self.alerts);
            changes.extend(resolved.into_values().map(AlertChange::Resolved));
        } else {
            self.apply_failure_rule(&mut changes);
            self.apply_success_rate_rule(&mut changes);
            self.apply_latency_rule(&mut changes);
        }
        self.update_status();
        changes
    }

    fn apply_failure_rule(&mut self, changes: &mut Vec<AlertChange>) {
        let failures = self.consecutive_failures;
        if failures < self.policy.failure_alert_threshold {
            return;
        }
        let severity = if failures >= self.policy.failure_escalation_threshold {
            Severity::Error
        } else {
            Severity::Warning
        };
        let message = format!("{failures} consecutive probe failures");
        match self.alerts.get_mut(&AlertKind::ConsecutiveFailures) {
            Some(alert) => {
                alert.message = message;
                if severity > alert.severity {
                    alert.severity = severity;
                    changes.push(AlertChange::Escalated(alert.clone()));
                }
            }
            None => {
                let alert = self.raise(AlertKind::ConsecutiveFailures, severity, message);
                changes.push(AlertChange::Raised(alert));
            }
        }
    }

    fn apply_success_rate_rule(&mut self, changes: &mut Vec<AlertChange>) {
        if (self.total_checks as usize) < self.policy.min_probes_for_rate
            || self.alerts.contains_key(&AlertKind::LowSuccessRate)
        {
            return;
        }
        let rate = self.success_rate();
        if rate < self.policy.low_success_rate {
            let message = format!(
                "success rate {:.0}% over the last {} probes",
                rate * 100.0,
                self.policy.success_rate_window.min(self.samples.len())
            );
            let alert = self.raise(AlertKind::LowSuccessRate, Severity::Warning, message);
            changes.push(AlertChange::Raised(alert));
        }
    }

    fn apply_latency_rule(&mut self, changes: &mut Vec<AlertChange>) {
        if self.policy.latency_alert.is_zero() || self.alerts.contains_key(&AlertKind::HighLatency)
        {
            return;
        }
        let recent: Vec<Duration> = self
            .samples
            .iter()
            .rev()
            .take(LATENCY_ALERT_WINDOW)
            .map(|s| s.latency)
            .collect();
        if recent.is_empty() {
            return;
        }
        let mean = recent.iter().sum::<Duration>() / recent.len() as u32;
        if mean > self.policy.latency_alert {
            let message = format!("mean probe latency {}ms", mean.as_millis());
            let alert = self.raise(AlertKind::HighLatency, Severity::Warning, message);
            changes.push(AlertChange::Raised(alert));
        }
    }

    fn raise(&mut self, kind: AlertKind, severity: Severity, message: String) -> Alert {
        let alert = Alert {
            kind,
            severity,
            message,
            raised_at_ms: now_ms(),
        };
        self.alerts.insert(kind, alert.clone());
        alert
    }

    fn update_status(&mut self) {
        let policy = &self.policy;
        self.status = if self.consecutive_failures >= policy.failure_escalation_threshold {
            BackendStatus::Failed
        } else if self.consecutive_failures >= policy.failure_alert_threshold {
            BackendStatus::Degraded
        } else if self.consecutive_successes >= policy.recovery_threshold {
            BackendStatus::Healthy
        } else if self.status == BackendStatus::Healthy
            && self.alerts.contains_key(&AlertKind::LowSuccessRate)
        {
            BackendStatus::Degraded
        } else {
            self.status
        };
    }

    /// Status implied by the probe history.
    pub fn derived_status(&self) -> BackendStatus {
        self.status
    }

    /// Success rate over the configured recent window; 1.0 without samples.
    pub fn success_rate(&self) -> f64 {
        let window = self.policy.success_rate_window;
        let recent: Vec<bool> = self.samples.iter().rev().take(window).map(|s| s.healthy).collect();
        if recent.is_empty() {
            return 1.0;
        }
        recent.iter().filter(|ok| **ok).count() as f64 / recent.len() as f64
    }

    pub fn latency_percentiles(&self) -> LatencyPercentiles {
        let mut latencies: Vec<u64> = self
            .samples
            .iter()
            .map(|s| s.latency.as_millis() as u64)
            .collect();
        if latencies.is_empty() {
            return LatencyPercentiles::default();
        }
        latencies.sort_unstable();
        let at = |p: f64| {
            let rank = ((p / 100.0) * latencies.len() as f64).ceil() as usize;
            latencies[rank.clamp(1, latencies.len()) - 1]
        };
        LatencyPercentiles {
            p50_ms: at(50.0),
            p90_ms: at(90.0),
            p95_ms: at(95.0),
            p99_ms: at(99.0),
        }
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.values().cloned().collect()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            status: self.status,
            success_rate: self.success_rate(),
            total_checks: self.total_checks,
            total_failures: self.total_failures,
            consecutive_failures: self.consecutive_failures,
            consecutive_successes: self.consecutive_successes,
            latency: self.latency_percentiles(),
            active_alerts: self.alerts.len(),
            alerts: self.active_alerts(),
            last_probe_ms: self.last_probe_ms,
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(ms: u64) -> ProbeSample {
        ProbeSample {
            healthy: true,
            latency: Duration::from_millis(ms),
            error: None,
        }
    }

    fn fail() -> ProbeSample {
        ProbeSample {
            healthy: false,
            latency: Duration::from_millis(5),
            error: Some("connection refused".into()),
        }
    }

    fn record() -> HealthRecord {
        HealthRecord::new(&HealthCheckConfig::default())
    }

    #[test]
    fn test_failure_alert_raises_and_escalates() {
        let mut r = record();
        assert!(r.record(fail()).is_empty());
        assert!(r.record(fail()).is_empty());

        let changes = r.record(fail());
        assert!(matches!(
            &changes[..],
            [AlertChange::Raised(Alert { kind: AlertKind::ConsecutiveFailures, severity: Severity::Warning, .. })]
        ));
        assert_eq!(r.derived_status(), BackendStatus::Degraded);

        assert!(r.record(fail()).is_empty());
        let changes = r.record(fail());
        assert!(matches!(
            &changes[..],
            [AlertChange::Escalated(Alert { severity: Severity::Error, .. })]
        ));
        assert_eq!(r.derived_status(), BackendStatus::Failed);
        assert_eq!(r.summary().active_alerts, 1);
        assert_eq!(r.summary().last_error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_recovery_resolves_all_alerts() {
        let mut r = record();
        for _ in 0..5 {
            r.record(fail());
        }
        r.record(ok(1));
        r.record(ok(1));
        assert_eq!(r.derived_status(), BackendStatus::Failed);
        assert_eq!(r.active_alerts().len(), 1);

        let changes = r.record(ok(1));
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], AlertChange::Resolved(_)));
        assert_eq!(r.derived_status(), BackendStatus::Healthy);
        assert!(r.active_alerts().is_empty());
    }

    #[test]
    fn test_low_success_rate_needs_min_probes() {
        let mut r = record();
        // Alternate so consecutive failures never reach the threshold.
        for i in 0..9 {
            let changes = r.record(if i % 3 == 2 { ok(1) } else { fail() });
            assert!(changes.is_empty(), "probe {i}");
        }
        let changes = r.record(fail());
        assert!(matches!(
            &changes[..],
            [AlertChange::Raised(Alert { kind: AlertKind::LowSuccessRate, .. })]
        ));
        assert!(r.success_rate() < 0.5);
        assert_eq!(r.derived_status(), BackendStatus::Degraded);
    }

    #[test]
    fn test_high_latency_alert() {
        let mut r = record();
        r.record(ok(40_000));
        assert_eq!(r.active_alerts()[0].kind, AlertKind::HighLatency);
    }

    #[test]
    fn test_percentiles() {
        let mut r = record();
        for ms in 1..=100 {
            r.record(ok(ms));
        }
        let p = r.latency_percentiles();
        assert_eq!((p.p50_ms, p.p90_ms, p.p95_ms, p.p99_ms), (50, 90, 95, 99));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut r = HealthRecord::new(&HealthCheckConfig {
            history_size: 3,
            ..HealthCheckConfig::default()
        });
        for ms in [100, 1, 2, 3] {
            r.record(ok(ms));
        }
        assert_eq!(r.latency_percentiles().p99_ms, 3);
        assert_eq!(r.summary().total_checks, 4);
    }
}
