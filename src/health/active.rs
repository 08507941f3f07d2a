//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every enabled backend instance
//! - Record results in the instance's health record and derive its status
//! - Feed probe outcomes into the backend's circuit breaker
//! - Publish alert changes to subscribers

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::join_all;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::backends::{BackendHandle, BackendRegistry, BackendStatus, ProbeOutcome};
use crate::config::HealthCheckConfig;
use crate::health::state::{AlertChange, HealthSummary, ProbeSample};
use crate::observability::metrics;

/// An alert change on one backend instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub backend: String,
    pub instance: String,
    #[serde(flatten)]
    pub change: AlertChange,
}

/// Result of one probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub backend: String,
    pub instance: String,
    pub healthy: bool,
    pub latency_ms: u64,
    pub status: BackendStatus,
}

/// Per-instance health as reported externally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub backend: String,
    pub instance: String,
    pub enabled: bool,
    pub status: BackendStatus,
    pub health: HealthSummary,
}

pub struct HealthMonitor {
    registry: Arc<BackendRegistry>,
    config: HealthCheckConfig,
    alerts: broadcast::Sender<AlertEvent>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<BackendRegistry>, config: HealthCheckConfig) -> Self {
        let (alerts, _) = broadcast::channel(256);
        Self {
            registry,
            config,
            alerts,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.alerts.subscribe()
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            timeout = self.config.timeout_secs,
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every enabled instance concurrently.
    pub async fn probe_all(&self) -> Vec<ProbeReport> {
        let handles: Vec<Arc<BackendHandle>> = self
            .registry
            .handles()
            .into_iter()
            .filter(|h| h.is_enabled())
            .collect();

        join_all(handles.iter().map(|h| self.probe_one(h))).await
    }

    async fn probe_one(&self, handle: &Arc<BackendHandle>) -> ProbeReport {
        let timeout = self.config.timeout();
        let started = Instant::now();
        let probe = AssertUnwindSafe(handle.adapter().health_probe())
            .catch_unwind()
            .map(|caught| {
                caught.unwrap_or_else(|_| {
                    ProbeOutcome::unhealthy(started.elapsed(), "health probe panicked")
                })
            });
        let outcome = time::timeout(timeout, probe).await;
        let sample = match outcome {
            Ok(outcome) => ProbeSample {
                healthy: outcome.healthy,
                latency: outcome.latency.max(started.elapsed()),
                error: outcome.error,
            },
            Err(_) => ProbeSample {
                healthy: false,
                latency: timeout,
                error: Some(format!("probe timed out after {}ms", timeout.as_millis())),
            },
        };

        if sample.healthy {
            handle.breaker().record_success();
        } else {
            tracing::warn!(
                backend = %handle.name(),
                instance = %handle.instance(),
                error = sample.error.as_deref().unwrap_or("unhealthy"),
                "Health probe failed"
            );
            handle.breaker().record_failure();
        }
        metrics::record_health_probe(handle.instance(), sample.latency);

        let healthy = sample.healthy;
        let latency_ms = sample.latency.as_millis() as u64;
        let (changes, derived) = {
            let mut record = handle.health().lock();
            let changes = record.record(sample);
            (changes, record.derived_status())
        };
        handle.set_status(derived);

        for change in changes {
            self.publish(handle, change);
        }

        ProbeReport {
            backend: handle.name().to_string(),
            instance: handle.instance().to_string(),
            healthy,
            latency_ms,
            status: handle.status(),
        }
    }

    fn publish(&self, handle: &BackendHandle, change: AlertChange) {
        match &change {
            AlertChange::Raised(alert) | AlertChange::Escalated(alert) => {
                tracing::warn!(
                    backend = %handle.name(),
                    instance = %handle.instance(),
                    kind = alert.kind.as_str(),
                    severity = ?alert.severity,
                    message = %alert.message,
                    "Health alert"
                );
                metrics::record_alert(handle.name(), alert.kind.as_str());
            }
            AlertChange::Resolved(alert) => {
                tracing::info!(
                    backend = %handle.name(),
                    instance = %handle.instance(),
                    kind = alert.kind.as_str(),
                    "Health alert resolved"
                );
            }
        }
        let _ = self.alerts.send(AlertEvent {
            backend: handle.name().to_string(),
            instance: handle.instance().to_string(),
            change,
        });
    }

    /// Per-instance health summaries, in registry priority order.
    pub fn snapshot(&self) -> Vec<BackendHealth> {
        self.registry
            .handles()
            .iter()
            .map(|h| BackendHealth {
                backend: h.name().to_string(),
                instance: h.instance().to_string(),
                enabled: h.is_enabled(),
                status: h.status(),
                health: h.health().lock().summary(),
            })
            .collect()
    }
}
