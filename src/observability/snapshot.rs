//! JSON stats snapshot.
//!
//! Combines orchestrator counters, queue counts, per-backend registry stats,
//! limiter utilization and health summaries into one serializable document
//! for the admin API and the CLI.

use serde::{Deserialize, Serialize};

use crate::backends::RegistryStats;
use crate::health::{BackendHealth, HealthMonitor};
use crate::jobs::types::now_ms;
use crate::jobs::QueueCounts;
use crate::orchestrator::{Orchestrator, OrchestratorStats};
use crate::rate_limit::RateLimiterStats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub version: String,
    pub taken_at_ms: u64,
    pub orchestrator: OrchestratorStats,
    pub queue: QueueCounts,
    pub registry: RegistryStats,
    pub rate_limit: RateLimiterStats,
    pub caller_rate_limit: RateLimiterStats,
    pub health: Vec<BackendHealth>,
}

impl StatsSnapshot {
    pub fn collect(orchestrator: &Orchestrator, health: &HealthMonitor) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            taken_at_ms: now_ms(),
            orchestrator: orchestrator.stats(),
            queue: orchestrator.queue_counts(),
            registry: orchestrator.registry().stats(),
            rate_limit: orchestrator.rate_limit_stats(),
            caller_rate_limit: orchestrator.caller_rate_limit_stats(),
            health: health.snapshot(),
        }
    }

    /// Jobs the queue currently knows about, each counted once.
    pub fn tracked_jobs(&self) -> usize {
        self.queue.pending + self.queue.in_flight + self.queue.terminal
    }

    /// Registered instances per health status name.
    pub fn status_counts(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for backend in &self.registry.backends {
            let name = backend.status.as_str();
            match counts.iter_mut().find(|(n, _)| n == name) {
                Some((_, count)) => *count += 1,
                None => counts.push((name.to_string(), 1)),
            }
        }
        counts
    }
}
