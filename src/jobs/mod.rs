//! Job model and queueing.
//!
//! # Data Flow
//! ```text
//! Orchestrator::submit
//!     → types.rs (Job built from JobRequest)
//!     → queue.rs (pending tier by priority)
//!     → worker dequeues (in-flight)
//!     → history.rs (terminal, bounded by count and age)
//! ```

pub mod history;
pub mod queue;
pub mod types;

pub use queue::{JobQueue, QueueCounts, QueueFull, QueueSnapshot};
pub use types::{Job, JobId, JobRequest, JobStatus, Priority};
