//! Error classification and retry policy.
//!
//! # Responsibilities
//! - Classify attempt failures (transient, permanent, rate limited, circuit open, timeout)
//! - Decide between retry, quota requeue and giving up
//! - Compute the delay before the next attempt
//!
//! # Design Decisions
//! - Rate limiting is not a failed attempt; the job is requeued without consuming one
//! - Permanent errors are never retried
//! - Jittered backoff prevents thundering herd

use std::any::Any;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RetryConfig;
use crate::resilience::backoff::calculate_backoff;

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network-class failure; retryable.
    Transient,
    /// Unsupported or malformed target; never retried.
    Permanent,
    /// Quota unavailable; requeued without counting an attempt.
    RateLimitExceeded,
    /// Backend isolated by its breaker; counted as an attempt and retried.
    CircuitOpen,
    /// Attempt exceeded its deadline; retryable.
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Timeout => "timeout",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Transient | ErrorKind::CircuitOpen | ErrorKind::Timeout
        )
    }

    /// Whether a backend returning this error should be charged a breaker failure.
    pub fn counts_against_backend(&self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified attempt error, as stored on the job.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    /// Backend-provided hint for `RateLimitExceeded`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn circuit_open(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CircuitOpen, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("attempt exceeded {}ms deadline", after.as_millis()),
        )
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: ErrorKind::RateLimitExceeded,
            message: message.into(),
            retry_after_ms: retry_after.map(|d| d.as_millis() as u64),
        }
    }

    /// Classify a panic caught from an adapter as a transient fault.
    pub fn panicked(payload: &(dyn Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string payload".to_string());
        Self::transient(format!("backend panicked: {detail}"))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_ms.map(Duration::from_millis)
    }
}

/// What to do with a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after `delay`; the attempt counts.
    Retry { delay: Duration },
    /// Put the job back without charging an attempt.
    Requeue { after: Option<Duration> },
    /// Terminal failure.
    GiveUp,
}

/// Retry policy built from [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before retrying after `attempt` attempts have run.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.config.base_delay_ms,
            self.config.backoff_factor,
            self.config.max_delay_ms,
            self.config.jitter_ratio,
        )
    }

    /// Decide the fate of a job that has run `attempts` of `max_attempts`.
    pub fn decide(&self, error: &JobError, attempts: u32, max_attempts: u32) -> RetryDecision {
        if error.kind == ErrorKind::RateLimitExceeded {
            return RetryDecision::Requeue {
                after: error.retry_after(),
            };
        }
        if error.kind.is_retryable() && attempts < max_attempts {
            return RetryDecision::Retry {
                delay: self.delay_for(attempts),
            };
        }
        RetryDecision::GiveUp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            base_delay_ms: 100,
            backoff_factor: 2.0,
            max_delay_ms: 1000,
            jitter_ratio: 0.0,
        })
    }

    #[test]
    fn test_retryable_until_exhausted() {
        let p = policy();
        let err = JobError::transient("connection reset");
        assert_eq!(
            p.decide(&err, 1, 3),
            RetryDecision::Retry {
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(
            p.decide(&err, 2, 3),
            RetryDecision::Retry {
                delay: Duration::from_millis(200)
            }
        );
        assert_eq!(p.decide(&err, 3, 3), RetryDecision::GiveUp);
    }

    #[test]
    fn test_permanent_never_retried() {
        assert_eq!(
            policy().decide(&JobError::permanent("unsupported"), 1, 5),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_rate_limit_requeues_without_attempt() {
        let err = JobError::rate_limited("slow down", Some(Duration::from_secs(2)));
        assert_eq!(
            policy().decide(&err, 3, 3),
            RetryDecision::Requeue {
                after: Some(Duration::from_secs(2))
            }
        );
    }

    #[test]
    fn test_error_serializes_kind() {
        let json = serde_json::to_value(JobError::timeout(Duration::from_secs(5))).unwrap();
        assert_eq!(json["kind"], "timeout");
        assert!(json.get("retry_after_ms").is_none());
    }
}
