//! Simulated backend adapter.
//!
//! Serves http(s) targets whose host matches one of its domains, after a
//! configurable latency, failing transiently at a configurable rate. Used by
//! the daemon when a `[[backends]]` entry carries a `simulation` block.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::{self, Instant};
use url::Url;

use crate::backends::{Backend, ExecutionContext, ProbeOutcome};
use crate::config::SimulationConfig;
use crate::jobs::Job;
use crate::resilience::JobError;

#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    name: String,
    domains: Vec<String>,
    latency: Duration,
    failure_rate: f64,
}

impl SimulatedBackend {
    pub fn new(name: impl Into<String>, config: &SimulationConfig) -> Self {
        Self {
            name: name.into(),
            domains: config
                .domains
                .iter()
                .map(|d| d.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
            latency: Duration::from_millis(config.latency_ms),
            failure_rate: config.failure_rate.clamp(0.0, 1.0),
        }
    }

    fn host_matches(&self, host: &str) -> bool {
        if self.domains.is_empty() {
            return true;
        }
        let host = host.to_ascii_lowercase();
        self.domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")))
    }
}

#[async_trait]
impl Backend for SimulatedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_handle(&self, target: &str) -> bool {
        let Ok(url) = Url::parse(target) else {
            return false;
        };
        matches!(url.scheme(), "http" | "https")
            && url.host_str().is_some_and(|h| self.host_matches(h))
    }

    async fn execute(&self, job: &Job, ctx: &ExecutionContext) -> Result<Value, JobError> {
        let started = Instant::now();
        let half = self.latency / 2;

        for (sleep, percent) in [(half, 50.0), (self.latency - half, 100.0)] {
            tokio::select! {
                _ = time::sleep(sleep) => ctx.report_progress(percent),
                _ = ctx.cancelled() => return Err(JobError::transient("cancelled")),
            }
        }

        if self.failure_rate > 0.0 && fastrand::f64() < self.failure_rate {
            return Err(JobError::transient(format!(
                "simulated failure from {}",
                self.name
            )));
        }

        Ok(json!({
            "backend": self.name,
            "target": job.target,
            "action": job.action,
            "attempt": ctx.attempt,
            "elapsed_ms": started.elapsed().as_millis() as u64,
        }))
    }

    async fn health_probe(&self) -> ProbeOutcome {
        ProbeOutcome::healthy(self.latency / 10)
    }
}
