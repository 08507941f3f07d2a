//! Worker loop: dispatch, attempt, retry.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::Value;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::backends::{CallOutcome, ExecutionContext, ProgressFn};
use crate::jobs::types::now_ms;
use crate::jobs::{Job, JobId, JobStatus, Priority};
use crate::observability::metrics;
use crate::orchestrator::{JobEvent, Shared};
use crate::resilience::timeouts::with_deadline;
use crate::resilience::{ErrorKind, JobError, RetryDecision};

impl Shared {
    pub(crate) async fn run_worker(self: Arc<Self>, worker: usize) {
        tracing::debug!(worker, "Worker started");
        while let Some(job) = self.queue.dequeue(&self.stop).await {
            metrics::record_queue_depth(self.queue.pending_len());
            if let Some(pause) = self.dispatch(job).await {
                tokio::select! {
                    _ = time::sleep(pause) => {}
                    _ = self.stop.cancelled() => {}
                }
            }
        }
        tracing::debug!(worker, "Worker stopped");
    }

    fn token_for(&self, id: &JobId) -> CancellationToken {
        self.tokens.entry(*id).or_default().value().clone()
    }

    /// Run one attempt of a dispatched job.
    ///
    /// Returns how long the worker should pause when the backend's quota was
    /// exhausted.
    async fn dispatch(self: &Arc<Self>, job: Job) -> Option<Duration> {
        let id = job.id;
        let token = self.token_for(&id);
        if token.is_cancelled() {
            self.finish_cancelled(&id);
            return None;
        }
        if job.started_at.is_none() {
            if let Some(created) = job.created_at {
                self.counters.queue_wait(created.elapsed());
            }
        }

        let Some(handle) = self.registry.select_for(&job.target) else {
            let error = match self.registry.find_capable(&job.target) {
                Some(name) => {
                    self.counters.circuit_rejected();
                    JobError::circuit_open(format!("backend {name} is unavailable"))
                }
                None => JobError::permanent(format!("no backend can handle target {}", job.target)),
            };
            tracing::debug!(job_id = %id, error = %error, "No backend selected");
            self.fail_before_execution(&id, error, &token);
            return None;
        };
        let backend = handle.name().to_string();

        if !self.limiter.try_acquire(&backend, 1) {
            self.counters.rate_limited();
            let wait = self.limiter.wait_time(&backend, 1);
            tracing::debug!(
                job_id = %id,
                backend = %backend,
                wait_ms = wait.as_millis() as u64,
                "Backend quota exhausted, requeueing"
            );
            self.queue.requeue(&id, job.priority, true);
            return Some(wait.min(self.config.rate_limit_backoff()));
        }

        if !handle.breaker().can_execute() {
            self.counters.circuit_rejected();
            let error = JobError::circuit_open(format!("circuit open for backend {backend}"));
            self.fail_before_execution(&id, error, &token);
            return None;
        }
        let call = handle.begin_call();

        // Re-checked under the queue lock; cancel() fires the token first.
        let started = self
            .queue
            .update_in_flight(&id, |job| {
                if token.is_cancelled() || !job.transition(JobStatus::Executing) {
                    return None;
                }
                job.attempts += 1;
                job.backend = Some(backend.clone());
                if job.started_at.is_none() {
                    job.started_at = Some(Instant::now());
                    job.started_at_ms = Some(now_ms());
                }
                Some(job.clone())
            })
            .flatten();
        let Some(job) = started else {
            self.registry.report_outcome(call, CallOutcome::Neutral);
            self.finish_cancelled(&id);
            return None;
        };

        metrics::record_in_flight(self.counters.attempt_started());
        tracing::info!(
            job_id = %id,
            backend = %backend,
            instance = %call.instance(),
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            "Job started"
        );
        self.events.emit(JobEvent::Started {
            job_id: id,
            backend: backend.clone(),
            attempt: job.attempts,
        });

        let ctx = ExecutionContext::new(id, job.attempts, token.clone())
            .with_progress(self.progress_sink(id));
        let limit = job.timeout().unwrap_or_else(|| self.config.attempt_timeout());
        let adapter = call.adapter().clone();
        let attempt_started = Instant::now();
        // A panicking adapter fails the attempt instead of taking the worker down.
        let attempt = AssertUnwindSafe(adapter.execute(&job, &ctx))
            .catch_unwind()
            .map(|caught| {
                caught.unwrap_or_else(|payload| {
                    let error = JobError::panicked(&*payload);
                    tracing::error!(
                        job_id = %id,
                        backend = %backend,
                        error = %error.message,
                        "Backend panicked"
                    );
                    Err(error)
                })
            });
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = with_deadline(limit, attempt) => Some(result),
        };
        // Adapters that bail out on cancellation return an error; cancel wins.
        let result = result.filter(|_| !token.is_cancelled());
        metrics::record_in_flight(self.counters.attempt_finished(attempt_started.elapsed()));

        match result {
            None => {
                self.registry.report_outcome(call, CallOutcome::Neutral);
                self.finish_cancelled(&id);
            }
            Some(Ok(value)) => {
                self.registry.report_outcome(call, CallOutcome::Success);
                self.finish_completed(&id, &backend, value);
            }
            Some(Err(error)) => {
                let outcome = if error.kind.counts_against_backend() {
                    CallOutcome::Failure
                } else {
                    CallOutcome::Neutral
                };
                self.registry.report_outcome(call, outcome);
                match error.kind {
                    ErrorKind::Timeout => self.counters.timed_out(),
                    ErrorKind::RateLimitExceeded => {
                        let penalty = error
                            .retry_after()
                            .unwrap_or_else(|| self.config.rate_limit_backoff());
                        self.limiter.penalize(&backend, penalty);
                    }
                    _ => {}
                }
                self.handle_failure(&id, Some(&backend), error, &token);
            }
        }
        None
    }

    fn progress_sink(self: &Arc<Self>, id: JobId) -> ProgressFn {
        let shared = Arc::downgrade(self);
        Arc::new(move |percent: f64| {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let reported = shared
                .queue
                .update_in_flight(&id, |job| {
                    (job.status == JobStatus::Executing).then(|| job.set_progress(percent))
                })
                .flatten();
            if let Some(percent) = reported {
                shared.events.emit(JobEvent::Progress { job_id: id, percent });
            }
        })
    }

    /// A failure before the adapter ran still consumes an attempt.
    fn fail_before_execution(self: &Arc<Self>, id: &JobId, error: JobError, token: &CancellationToken) {
        self.queue.update_in_flight(id, |job| job.attempts += 1);
        self.handle_failure(id, None, error, token);
    }

    fn handle_failure(
        self: &Arc<Self>,
        id: &JobId,
        backend: Option<&str>,
        error: JobError,
        token: &CancellationToken,
    ) {
        let Some((attempts, max_attempts, priority)) = self.queue.update_in_flight(id, |job| {
            job.last_error = Some(error.clone());
            (job.attempts, job.max_attempts, job.priority)
        }) else {
            return;
        };

        match self.policy.decide(&error, attempts, max_attempts) {
            RetryDecision::Requeue { after } => {
                self.counters.rate_limited();
                metrics::record_rate_limited(metrics::BACKEND_LIMITER);
                self.queue
                    .update_in_flight(id, |job| job.attempts = job.attempts.saturating_sub(1));
                tracing::warn!(
                    job_id = %id,
                    backend = backend.unwrap_or("unknown"),
                    retry_after_ms = after.map(|d| d.as_millis() as u64),
                    "Backend rate limited the job, requeueing"
                );
                if self.queue.requeue(id, priority, true) {
                    self.events.emit(JobEvent::Queued {
                        job_id: *id,
                        priority,
                    });
                }
            }
            RetryDecision::Retry { delay } => {
                self.counters.retried();
                metrics::record_retry(error.kind.as_str());
                self.queue
                    .update_in_flight(id, |job| job.transition(JobStatus::Retrying));
                tracing::warn!(
                    job_id = %id,
                    attempt = attempts,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    kind = error.kind.as_str(),
                    error = %error.message,
                    "Attempt failed, retrying"
                );
                self.events.emit(JobEvent::Retrying {
                    job_id: *id,
                    attempt: attempts,
                    delay_ms: delay.as_millis() as u64,
                    error,
                });
                self.schedule_retry(*id, priority.max(Priority::High), delay, token.clone());
            }
            RetryDecision::GiveUp => self.finish_failed(id, error),
        }
    }

    fn schedule_retry(
        self: &Arc<Self>,
        id: JobId,
        priority: Priority,
        delay: Duration,
        token: CancellationToken,
    ) {
        let shared = self.clone();
        self.tracker.spawn(async move {
            // At shutdown the job goes straight back to pending.
            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = token.cancelled() => {}
                _ = shared.stop.cancelled() => {}
            }
            if token.is_cancelled() {
                shared.finish_cancelled(&id);
                return;
            }
            if shared.queue.requeue(&id, priority, true) {
                shared.events.emit(JobEvent::Queued {
                    job_id: id,
                    priority,
                });
            }
        });
    }

    fn finish_completed(&self, id: &JobId, backend: &str, value: Value) {
        let Some(job) = self.queue.retire(id, |job| {
            job.transition(JobStatus::Completed);
            job.result = Some(value);
        }) else {
            return;
        };
        self.tokens.remove(id);
        self.counters.completed();
        record_finished(&job, "completed");
        tracing::info!(
            job_id = %id,
            backend = %backend,
            attempts = job.attempts,
            "Job completed"
        );
        self.events.emit(JobEvent::Completed {
            job_id: *id,
            backend: backend.to_string(),
            attempts: job.attempts,
            result: job.result.unwrap_or(Value::Null),
        });
    }

    fn finish_failed(&self, id: &JobId, error: JobError) {
        let Some(job) = self.queue.retire(id, |job| {
            job.transition(JobStatus::Failed);
        }) else {
            return;
        };
        self.tokens.remove(id);
        self.counters.failed();
        record_finished(&job, "failed");
        tracing::error!(
            job_id = %id,
            attempts = job.attempts,
            kind = error.kind.as_str(),
            error = %error.message,
            "Job failed"
        );
        self.events.emit(JobEvent::Failed {
            job_id: *id,
            attempts: job.attempts,
            error,
        });
    }

    fn finish_cancelled(&self, id: &JobId) {
        if let Some(job) = self.queue.retire(id, |job| {
            job.transition(JobStatus::Cancelled);
        }) {
            self.on_cancelled(&job);
        }
    }

    pub(crate) fn on_cancelled(&self, job: &Job) {
        self.tokens.remove(&job.id);
        self.counters.cancelled();
        record_finished(job, "cancelled");
        tracing::info!(job_id = %job.id, attempts = job.attempts, "Job cancelled");
        self.events.emit(JobEvent::Cancelled { job_id: job.id });
    }
}

fn record_finished(job: &Job, outcome: &'static str) {
    let elapsed = job.created_at.map(|c| c.elapsed()).unwrap_or_default();
    metrics::record_job_finished(outcome, elapsed);
}
