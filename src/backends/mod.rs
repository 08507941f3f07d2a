//! Backend subsystem.
//!
//! # Data Flow
//! ```text
//! Composition root registers adapters (trait `Backend`)
//!     → registry.rs (entries ordered by priority, one breaker per backend)
//!     → SelectFor(target): capability probe + status + breaker filter
//!     → strategy (round_robin.rs | least_loaded.rs | strategy.rs) picks an instance
//!     → handle.rs (load guard held for the duration of the call)
//! ```
//!
//! # Design Decisions
//! - Adapters are explicit trait objects; there is no discovery
//! - The registry snapshot is swapped atomically, selection never takes a lock
//! - A cached target → backend resolution is re-checked against status and
//!   breaker on every use

pub mod cache;
pub mod handle;
pub mod least_loaded;
pub mod registry;
pub mod round_robin;
pub mod simulated;
pub mod strategy;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::jobs::{Job, JobId};
use crate::resilience::JobError;

pub use handle::{BackendCall, BackendHandle, BackendStatus, CallOutcome};
pub use registry::{BackendOptions, BackendRegistry, BackendStats, RegistryStats};

/// Result of a liveness check.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub healthy: bool,
    pub latency: Duration,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn healthy(latency: Duration) -> Self {
        Self {
            healthy: true,
            latency,
            error: None,
        }
    }

    pub fn unhealthy(latency: Duration, error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            latency,
            error: Some(error.into()),
        }
    }
}

/// Progress sink handed to adapters.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Per-attempt context passed to [`Backend::execute`].
#[derive(Clone)]
pub struct ExecutionContext {
    pub job_id: JobId,
    pub attempt: u32,
    cancel: CancellationToken,
    progress: Option<ProgressFn>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("job_id", &self.job_id)
            .field("attempt", &self.attempt)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl ExecutionContext {
    pub fn new(job_id: JobId, attempt: u32, cancel: CancellationToken) -> Self {
        Self {
            job_id,
            attempt,
            cancel,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Report completion percentage; values are clamped to 0..=100.
    pub fn report_progress(&self, percent: f64) {
        if let Some(progress) = &self.progress {
            progress(percent);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the job is cancelled; adapters may select on it.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// A pluggable adapter serving some subset of targets.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Registry key; adapters sharing a name are interchangeable instances.
    fn name(&self) -> &str;

    /// Cheap capability probe; must not do the actual work.
    fn can_handle(&self, target: &str) -> bool;

    /// Perform the unit of work. Errors must be classified.
    async fn execute(&self, job: &Job, ctx: &ExecutionContext) -> Result<Value, JobError>;

    /// Lightweight liveness check.
    async fn health_probe(&self) -> ProbeOutcome {
        ProbeOutcome::healthy(Duration::ZERO)
    }
}
