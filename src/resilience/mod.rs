//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Attempt against a backend:
//!     → circuit_breaker.rs (admit or reject fast)
//!     → timeouts.rs (enforce the per-attempt deadline)
//!     → On failure: retries.rs (classify, decide retry / requeue / give up)
//!     → backoff.rs (delay before the next attempt)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every backend call has a deadline
//! - Circuit breaker prevents cascading failures
//! - Expected conditions (breaker open, quota exhausted) are return values, not errors

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use retries::{ErrorKind, JobError, RetryDecision, RetryPolicy};
