//! Resilience and scheduling core for a multi-backend retrieval service.
//!
//! Clients submit jobs (a target plus an action); the core queues them by
//! priority, picks a healthy backend able to serve each target, bounds
//! concurrency, rate-limits per backend, retries transient failures with
//! backoff and isolates failing backends behind circuit breakers.

pub mod admin;
pub mod backends;
pub mod config;
pub mod health;
pub mod jobs;
pub mod lifecycle;
pub mod observability;
pub mod orchestrator;
pub mod rate_limit;
pub mod resilience;

pub use backends::{Backend, BackendRegistry, ExecutionContext, ProbeOutcome};
pub use config::CoreConfig;
pub use jobs::{Job, JobId, JobRequest, JobStatus, Priority};
pub use lifecycle::{RetrievalCore, Shutdown};
pub use orchestrator::{JobEvent, Orchestrator, SubmitError};
pub use resilience::{ErrorKind, JobError};
