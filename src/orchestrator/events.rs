//! Job lifecycle events.
//!
//! Every event goes to the broadcast stream and to the job's own observer,
//! if it registered one. Observers run outside every internal lock and a
//! panicking observer is contained.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::jobs::{JobId, Priority};
use crate::resilience::JobError;

/// Per-job callback handle.
pub type JobObserver = Arc<dyn Fn(&JobEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Queued {
        job_id: JobId,
        priority: Priority,
    },
    Started {
        job_id: JobId,
        backend: String,
        attempt: u32,
    },
    Progress {
        job_id: JobId,
        percent: u8,
    },
    Retrying {
        job_id: JobId,
        attempt: u32,
        delay_ms: u64,
        error: JobError,
    },
    Completed {
        job_id: JobId,
        backend: String,
        attempts: u32,
        result: Value,
    },
    Failed {
        job_id: JobId,
        attempts: u32,
        error: JobError,
    },
    Cancelled {
        job_id: JobId,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Queued { job_id, .. }
            | JobEvent::Started { job_id, .. }
            | JobEvent::Progress { job_id, .. }
            | JobEvent::Retrying { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. }
            | JobEvent::Cancelled { job_id } => *job_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Queued { .. } => "queued",
            JobEvent::Started { .. } => "started",
            JobEvent::Progress { .. } => "progress",
            JobEvent::Retrying { .. } => "retrying",
            JobEvent::Completed { .. } => "completed",
            JobEvent::Failed { .. } => "failed",
            JobEvent::Cancelled { .. } => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::Completed { .. } | JobEvent::Failed { .. } | JobEvent::Cancelled { .. }
        )
    }
}

pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
    observers: DashMap<JobId, JobObserver>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            observers: DashMap::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    pub fn attach(&self, job_id: JobId, observer: JobObserver) {
        self.observers.insert(job_id, observer);
    }

    pub fn detach(&self, job_id: &JobId) {
        self.observers.remove(job_id);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Deliver `event`; the job's observer is dropped after a terminal event.
    pub fn emit(&self, event: JobEvent) {
        let job_id = event.job_id();
        // Clone out of the map so the shard lock is released before the call.
        let observer = if event.is_terminal() {
            self.observers.remove(&job_id).map(|(_, o)| o)
        } else {
            self.observers.get(&job_id).map(|o| o.value().clone())
        };

        if let Some(observer) = observer {
            if catch_unwind(AssertUnwindSafe(|| observer(&event))).is_err() {
                tracing::error!(job_id = %job_id, event = event.name(), "Job observer panicked");
            }
        }

        let _ = self.tx.send(event);
    }
}
