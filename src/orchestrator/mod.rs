//! Job orchestration.
//!
//! # Responsibilities
//! - Accept submissions and fail fast on targets no backend serves
//! - Drain the job queue with a fixed pool of workers
//! - Gate each attempt on the backend's rate limit and circuit breaker
//! - Retry with backoff, record terminal outcomes, emit lifecycle events
//! - Cancel pending jobs synchronously and in-flight jobs cooperatively
//!
//! # Data Flow
//! ```text
//! submit() → validate → caller quota → JobQueue
//!     worker (worker.rs) → dequeue → registry.select_for → backend quota
//!         → breaker → adapter.execute (deadline + cancel) → report_outcome
//!         → Completed | Retrying → timer → requeue | Failed
//! ```
//!
//! # Design Decisions
//! - Every job gets a cancellation token at submission; cancel() fires it
//!   before touching the queue, and the worker re-checks it under the queue
//!   lock when moving to Executing, so a cancelled job never starts
//! - Retry delays run on their own tasks so a waiting job never holds a
//!   worker slot
//! - Shutdown stops dispatching, fires pending retry timers immediately and
//!   waits for in-flight attempts up to the grace period

pub mod events;
pub mod stats;
mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::backends::BackendRegistry;
use crate::config::{ConfigError, CoreConfig, OrchestratorConfig, RateLimitConfig};
use crate::jobs::{
    Job, JobId, JobQueue, JobRequest, JobStatus, QueueCounts, QueueFull, QueueSnapshot,
};
use crate::observability::metrics;
use crate::rate_limit::{Quota, RateLimiter, RateLimiterStats};
use crate::resilience::RetryPolicy;

pub use events::{EventBus, JobEvent, JobObserver};
pub use stats::OrchestratorStats;

use stats::Counters;

/// Why a submission was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("target must not be empty")]
    EmptyTarget,

    #[error("no backend can handle target: {0}")]
    Unsupported(String),

    #[error(transparent)]
    QueueFull(#[from] QueueFull),

    #[error("caller {caller} is rate limited, retry in {retry_after_ms}ms")]
    RateLimited { caller: String, retry_after_ms: u64 },

    #[error("orchestrator is shutting down")]
    ShuttingDown,
}

/// Counts removed by one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub history: usize,
    pub rate_limit_keys: usize,
    pub cache_entries: usize,
}

/// State shared between the API handle, workers and timers.
pub(crate) struct Shared {
    pub(crate) config: OrchestratorConfig,
    pub(crate) queue: JobQueue,
    pub(crate) registry: Arc<BackendRegistry>,
    pub(crate) limiter: Arc<RateLimiter>,
    pub(crate) caller_limiter: Arc<RateLimiter>,
    pub(crate) policy: RetryPolicy,
    pub(crate) events: EventBus,
    pub(crate) counters: Counters,
    pub(crate) tokens: DashMap<JobId, CancellationToken>,
    pub(crate) stop: CancellationToken,
    pub(crate) tracker: TaskTracker,
}

pub struct Orchestrator {
    shared: Arc<Shared>,
    started: AtomicBool,
}

impl Orchestrator {
    /// Build an orchestrator over `registry`; invalid quotas are rejected here.
    pub fn new(config: &CoreConfig, registry: Arc<BackendRegistry>) -> Result<Self, ConfigError> {
        let limiter = RateLimiter::new(&config.rate_limit)?;
        for backend in &config.backends {
            if let Some(quota) = backend.rate_limit {
                limiter.set_quota(&backend.name, Quota::from(quota))?;
            }
        }
        let caller_limiter = RateLimiter::new(&RateLimitConfig::from(&config.caller_rate_limit))?
            .scoped(metrics::CALLER_LIMITER);
        let orchestrator = &config.orchestrator;

        Ok(Self {
            shared: Arc::new(Shared {
                config: orchestrator.clone(),
                queue: JobQueue::new(
                    orchestrator.max_queue_size,
                    orchestrator.history_capacity,
                    orchestrator.history_max_age(),
                ),
                registry,
                limiter: Arc::new(limiter),
                caller_limiter: Arc::new(caller_limiter),
                policy: RetryPolicy::new(config.retries.clone()),
                events: EventBus::new(orchestrator.event_buffer),
                counters: Counters::default(),
                tokens: DashMap::new(),
                stop: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
            started: AtomicBool::new(false),
        })
    }

    /// Spawn the worker pool and the cleanup task. Later calls are no-ops.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) || self.shared.stop.is_cancelled() {
            return;
        }
        let workers = self.shared.config.max_concurrency.max(1);
        for worker in 0..workers {
            let shared = self.shared.clone();
            self.shared.tracker.spawn(shared.run_worker(worker));
        }
        let shared = self.shared.clone();
        self.shared.tracker.spawn(shared.run_maintenance());

        tracing::info!(
            workers,
            max_queue_size = self.shared.queue.capacity(),
            "Orchestrator started"
        );
    }

    /// Queue a job and return its id without waiting for execution.
    pub fn submit(&self, request: JobRequest) -> Result<JobId, SubmitError> {
        let shared = &self.shared;
        if shared.stop.is_cancelled() {
            return Err(SubmitError::ShuttingDown);
        }

        let target = request.target.trim();
        if target.is_empty() {
            return Err(SubmitError::EmptyTarget);
        }
        if shared.registry.find_capable(target).is_none() {
            tracing::debug!(target = %target, "Rejected submission, no capable backend");
            return Err(SubmitError::Unsupported(target.to_string()));
        }
        // Reject on a full queue before charging the caller. A concurrent
        // submission can still fill the last slot in between; enqueue decides.
        if shared.queue.pending_len() >= shared.queue.capacity() {
            let capacity = shared.queue.capacity();
            tracing::warn!(capacity, "Rejected submission, queue full");
            return Err(QueueFull { capacity }.into());
        }
        if let Some(caller) = request.caller.as_deref() {
            if !shared.caller_limiter.try_acquire(caller, 1) {
                let retry_after = shared.caller_limiter.wait_time(caller, 1);
                tracing::warn!(caller = %caller, retry_after_ms = retry_after.as_millis() as u64, "Caller rate limited");
                return Err(SubmitError::RateLimited {
                    caller: caller.to_string(),
                    retry_after_ms: retry_after.as_millis() as u64,
                });
            }
        }

        let job = Job::new(&request, shared.config.default_max_attempts);
        let (id, priority) = (job.id, job.priority);
        shared.tokens.insert(id, CancellationToken::new());
        if let Some(observer) = request.observer {
            shared.events.attach(id, observer);
        }

        if let Err(full) = shared.queue.enqueue(job) {
            shared.tokens.remove(&id);
            shared.events.detach(&id);
            tracing::warn!(capacity = full.capacity, "Rejected submission, queue full");
            return Err(full.into());
        }

        shared.counters.submitted();
        metrics::record_job_submitted(priority.as_str());
        metrics::record_queue_depth(shared.queue.pending_len());
        tracing::info!(job_id = %id, target = %target, priority = %priority, "Job submitted");
        shared.events.emit(JobEvent::Queued {
            job_id: id,
            priority,
        });
        Ok(id)
    }

    pub fn status(&self, id: &JobId) -> Option<Job> {
        self.shared.queue.get(id)
    }

    /// Cancel a job. Pending jobs are cancelled immediately; in-flight jobs
    /// observe the request at their next await point.
    ///
    /// Returns false for unknown or already terminal jobs.
    pub fn cancel(&self, id: &JobId) -> bool {
        let shared = &self.shared;
        let Some(token) = shared.tokens.get(id).map(|t| t.value().clone()) else {
            return false;
        };
        token.cancel();

        if let Some(job) = shared.queue.remove(id) {
            shared.on_cancelled(&job);
            return true;
        }
        tracing::info!(job_id = %id, "Cancellation requested for in-flight job");
        self.status(id).is_some_and(|job| {
            !job.status.is_terminal() || job.status == JobStatus::Cancelled
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.shared.events.subscribe()
    }

    pub fn stats(&self) -> OrchestratorStats {
        self.shared.counters.snapshot()
    }

    pub fn queue_counts(&self) -> QueueCounts {
        self.shared.queue.counts()
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.shared.queue.snapshot()
    }

    /// Recently finished jobs, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Job> {
        self.shared.queue.recent_terminal(limit)
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.shared.registry
    }

    /// The per-backend limiter.
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.shared.limiter
    }

    pub fn rate_limit_stats(&self) -> RateLimiterStats {
        self.shared.limiter.stats()
    }

    pub fn caller_rate_limit_stats(&self) -> RateLimiterStats {
        self.shared.caller_limiter.stats()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.stop.is_cancelled()
    }

    /// Evict aged history, idle rate limit keys and stale cache entries.
    pub fn cleanup(&self) -> CleanupReport {
        self.shared.cleanup()
    }

    /// Stop dispatching and drain in-flight work within the grace period,
    /// then cancel whatever is still running. Pending jobs stay queryable.
    pub async fn shutdown(&self) {
        let shared = &self.shared;
        if shared.stop.is_cancelled() {
            shared.tracker.wait().await;
            return;
        }
        let counts = shared.queue.counts();
        tracing::info!(
            pending = counts.pending,
            in_flight = counts.in_flight,
            "Orchestrator shutting down"
        );
        shared.stop.cancel();
        shared.tracker.close();

        let grace = shared.config.shutdown_grace();
        if time::timeout(grace, shared.tracker.wait()).await.is_err() {
            let remaining = shared.queue.in_flight_ids();
            tracing::warn!(
                remaining = remaining.len(),
                grace_secs = grace.as_secs(),
                "Grace period elapsed, cancelling in-flight jobs"
            );
            for id in remaining {
                if let Some(token) = shared.tokens.get(&id) {
                    token.cancel();
                }
            }
            shared.tracker.wait().await;
        }
        tracing::info!(pending = shared.queue.pending_len(), "Orchestrator stopped");
    }
}

impl Shared {
    pub(crate) fn cleanup(&self) -> CleanupReport {
        let report = CleanupReport {
            history: self.queue.evict_history(),
            rate_limit_keys: self.limiter.evict_expired() + self.caller_limiter.evict_expired(),
            cache_entries: self.registry.evict_cache(),
        };
        tracing::debug!(
            history = report.history,
            rate_limit_keys = report.rate_limit_keys,
            cache_entries = report.cache_entries,
            "Cleanup pass finished"
        );
        report
    }

    async fn run_maintenance(self: Arc<Self>) {
        let mut ticker = time::interval(self.config.cleanup_interval());
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cleanup();
                }
                _ = self.stop.cancelled() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::handle::tests::Named;
    use crate::jobs::Priority;

    fn orchestrator(config: CoreConfig) -> Orchestrator {
        let registry = Arc::new(BackendRegistry::from_config(&config));
        registry.register(Arc::new(Named {
            name: "pages".to_string(),
            suffix: ".html".to_string(),
        }));
        Orchestrator::new(&config, registry).unwrap()
    }

    #[test]
    fn test_submit_validation() {
        let orch = orchestrator(CoreConfig::default());
        assert_eq!(orch.submit(JobRequest::new("   ")), Err(SubmitError::EmptyTarget));
        assert_eq!(
            orch.submit(JobRequest::new("a.pdf")),
            Err(SubmitError::Unsupported("a.pdf".to_string()))
        );

        let id = orch.submit(JobRequest::new("a.html")).unwrap();
        let job = orch.status(&id).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(orch.stats().submitted, 1);
    }

    #[test]
    fn test_queue_full() {
        let mut config = CoreConfig::default();
        config.orchestrator.max_queue_size = 1;
        let orch = orchestrator(config);
        orch.submit(JobRequest::new("a.html")).unwrap();
        assert_eq!(
            orch.submit(JobRequest::new("b.html")),
            Err(SubmitError::QueueFull(QueueFull { capacity: 1 }))
        );
        assert_eq!(orch.stats().submitted, 1);
    }

    #[test]
    fn test_queue_full_does_not_charge_caller() {
        let mut config = CoreConfig::default();
        config.orchestrator.max_queue_size = 1;
        config.caller_rate_limit.enabled = true;
        config.caller_rate_limit.quota.max_requests = 2;
        let orch = orchestrator(config);

        let first = orch.submit(JobRequest::new("a.html").caller("alice")).unwrap();
        for _ in 0..3 {
            assert_eq!(
                orch.submit(JobRequest::new("b.html").caller("alice")),
                Err(SubmitError::QueueFull(QueueFull { capacity: 1 }))
            );
        }
        assert_eq!(orch.shared.caller_limiter.stats().admitted, 1);

        assert!(orch.cancel(&first));
        orch.submit(JobRequest::new("b.html").caller("alice")).unwrap();
        assert_eq!(orch.shared.caller_limiter.stats().admitted, 2);
    }

    #[test]
    fn test_caller_quota() {
        let mut config = CoreConfig::default();
        config.caller_rate_limit.enabled = true;
        config.caller_rate_limit.quota.max_requests = 2;
        let orch = orchestrator(config);

        for _ in 0..2 {
            orch.submit(JobRequest::new("a.html").caller("alice")).unwrap();
        }
        let err = orch.submit(JobRequest::new("a.html").caller("alice")).unwrap_err();
        assert!(matches!(err, SubmitError::RateLimited { ref caller, .. } if caller == "alice"));
        orch.submit(JobRequest::new("a.html").caller("bob")).unwrap();
    }

    #[test]
    fn test_cancel_pending() {
        let orch = orchestrator(CoreConfig::default());
        let mut events = orch.subscribe();
        let id = orch.submit(JobRequest::new("a.html").priority(Priority::Low)).unwrap();

        assert!(orch.cancel(&id));
        assert_eq!(orch.status(&id).unwrap().status, JobStatus::Cancelled);
        assert!(!orch.cancel(&id));
        assert!(!orch.cancel(&JobId::new_v4()));

        assert_eq!(events.try_recv().unwrap().name(), "queued");
        assert_eq!(events.try_recv().unwrap().name(), "cancelled");
        assert_eq!(orch.stats().cancelled, 1);
        assert_eq!(orch.queue_counts().terminal, 1);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let orch = orchestrator(CoreConfig::default());
        orch.shutdown().await;
        assert_eq!(
            orch.submit(JobRequest::new("a.html")),
            Err(SubmitError::ShuttingDown)
        );
    }
}
