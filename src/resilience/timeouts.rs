//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap backend calls with a per-attempt deadline
//! - Turn an elapsed deadline into a classified `Timeout` error
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the timed-out future is dropped
//! - Timeout errors are distinct from other errors and retryable

use std::future::Future;
use std::time::Duration;

use crate::resilience::retries::JobError;

/// Run `fut` with a deadline of `limit`.
pub async fn with_deadline<F, T>(limit: Duration, fut: F) -> Result<T, JobError>
where
    F: Future<Output = Result<T, JobError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(JobError::timeout(limit)),
    }
}
