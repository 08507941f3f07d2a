//! Rate limiting subsystem.
//!
//! # Data Flow
//! ```text
//! Orchestrator worker / submission path
//!     → limiter.rs (look up or create the key's bucket)
//!     → algorithms.rs (token bucket | sliding window | fixed window | leaky bucket)
//!     → admitted / rejected (plain bool, never an error)
//! ```
//!
//! Two limiters are wired by default: one keyed by backend name (dispatch
//! admission) and one keyed by caller id (submission quota).

pub mod algorithms;
pub mod limiter;

pub use algorithms::Quota;
pub use limiter::{KeyUsage, RateLimitError, RateLimiter, RateLimiterStats};
