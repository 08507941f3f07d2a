//! Job model.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::orchestrator::events::JobObserver;
use crate::resilience::JobError;

pub type JobId = Uuid;

/// Scheduling priority; higher variants are dequeued first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    /// Highest first, in dequeue order.
    pub const ALL: [Priority; 4] = [
        Priority::Urgent,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    /// Index of this priority's tier in dequeue order.
    pub(crate) fn tier(&self) -> usize {
        match self {
            Priority::Urgent => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Job lifecycle.
///
/// ```text
/// Pending → Queued → Dispatching → Executing → Completed
///                        │              ├──→ Retrying → Queued
///                        │              ├──→ Failed
///                        └──────────────┴──→ Queued (quota requeue)
/// Cancelled is reachable from every non-terminal state.
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Dispatching,
    Executing,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        if self.is_terminal() {
            return false;
        }
        if next == Cancelled {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Queued)
                | (Queued, Dispatching)
                | (Dispatching, Executing)
                | (Dispatching, Queued)
                | (Dispatching, Retrying)
                | (Dispatching, Failed)
                | (Executing, Completed)
                | (Executing, Retrying)
                | (Executing, Failed)
                | (Executing, Queued)
                | (Retrying, Queued)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Dispatching => "dispatching",
            JobStatus::Executing => "executing",
            JobStatus::Retrying => "retrying",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One unit of requested work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub target: String,
    pub action: String,
    /// Current scheduling priority; raised on retry.
    pub priority: Priority,
    /// Priority the job was submitted with.
    pub submitted_priority: Priority,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub caller: Option<String>,
    pub timeout_ms: Option<u64>,
    pub created_at_ms: u64,
    pub started_at_ms: Option<u64>,
    pub completed_at_ms: Option<u64>,
    pub last_error: Option<JobError>,
    pub progress: Option<u8>,
    /// Backend of the most recent attempt.
    pub backend: Option<String>,
    pub result: Option<serde_json::Value>,

    #[serde(skip)]
    pub(crate) created_at: Option<Instant>,
    #[serde(skip)]
    pub(crate) started_at: Option<Instant>,
}

impl Job {
    pub fn new(request: &JobRequest, default_max_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: request.target.trim().to_string(),
            action: request.action.clone(),
            priority: request.priority,
            submitted_priority: request.priority,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: request.max_attempts.unwrap_or(default_max_attempts).max(1),
            caller: request.caller.clone(),
            timeout_ms: request.timeout.map(|t| t.as_millis() as u64),
            created_at_ms: now_ms(),
            started_at_ms: None,
            completed_at_ms: None,
            last_error: None,
            progress: None,
            backend: None,
            result: None,
            created_at: Some(Instant::now()),
            started_at: None,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Move to `next` if the lifecycle allows it; returns whether it moved.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::debug!(
                job_id = %self.id,
                from = %self.status,
                to = %next,
                "Ignoring invalid status transition"
            );
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at_ms = Some(now_ms());
        }
        true
    }

    pub fn set_progress(&mut self, percent: f64) -> u8 {
        let clamped = if percent.is_finite() {
            percent.clamp(0.0, 100.0).round() as u8
        } else {
            0
        };
        self.progress = Some(clamped);
        clamped
    }
}

/// A submission.
#[derive(Clone)]
pub struct JobRequest {
    pub target: String,
    pub action: String,
    pub priority: Priority,
    pub max_attempts: Option<u32>,
    pub timeout: Option<Duration>,
    pub caller: Option<String>,
    pub observer: Option<JobObserver>,
}

impl fmt::Debug for JobRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRequest")
            .field("target", &self.target)
            .field("action", &self.action)
            .field("priority", &self.priority)
            .field("max_attempts", &self.max_attempts)
            .field("timeout", &self.timeout)
            .field("caller", &self.caller)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl JobRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            action: "fetch".to_string(),
            priority: Priority::Normal,
            max_attempts: None,
            timeout: None,
            caller: None,
            observer: None,
        }
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    pub fn observer(mut self, observer: JobObserver) -> Self {
        self.observer = Some(observer);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::High.max(Priority::Low), Priority::High);
        assert_eq!("URGENT".parse::<Priority>(), Ok(Priority::Urgent));
        assert!("asap".parse::<Priority>().is_err());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(!terminal.can_transition_to(JobStatus::Queued));
            assert!(!terminal.can_transition_to(JobStatus::Cancelled));
        }
        assert!(JobStatus::Retrying.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Executing));
    }

    #[test]
    fn test_job_from_request() {
        let req = JobRequest::new("  https://example.com/a  ")
            .action("metadata")
            .priority(Priority::High)
            .max_attempts(0)
            .timeout(Duration::from_secs(5));
        let mut job = Job::new(&req, 3);

        assert_eq!(job.target, "https://example.com/a");
        assert_eq!(job.action, "metadata");
        assert_eq!(job.max_attempts, 1);
        assert_eq!(job.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(job.status, JobStatus::Pending);

        assert!(job.transition(JobStatus::Queued));
        assert!(!job.transition(JobStatus::Completed));
        assert!(job.transition(JobStatus::Cancelled));
        assert!(job.completed_at_ms.is_some());
    }

    #[test]
    fn test_progress_clamped() {
        let mut job = Job::new(&JobRequest::new("t"), 3);
        assert_eq!(job.set_progress(150.0), 100);
        assert_eq!(job.set_progress(-3.0), 0);
        assert_eq!(job.set_progress(42.4), 42);
    }

    #[test]
    fn test_job_serializes_without_instants() {
        let job = Job::new(&JobRequest::new("t").caller("alice"), 3);
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["priority"], "normal");
        assert!(json.get("created_at").is_none());

        let back: Job = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, job.id);
        assert!(back.created_at.is_none());
    }
}
