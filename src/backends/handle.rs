//! Backend handle abstraction.
//!
//! # Responsibilities
//! - Represent a single registered backend instance
//! - Track in-flight calls (for least-loaded selection)
//! - Track status (Healthy/Degraded/Failed/Disabled)
//! - Share the backend's circuit breaker and own the instance's health record

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::backends::Backend;
use crate::health::state::HealthRecord;
use crate::observability::metrics;
use crate::resilience::CircuitBreaker;

/// Status enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStatus {
    Healthy = 0,
    Degraded = 1,
    Failed = 2,
    Disabled = 3,
}

impl From<u8> for BackendStatus {
    fn from(val: u8) -> Self {
        match val {
            0 => BackendStatus::Healthy,
            1 => BackendStatus::Degraded,
            2 => BackendStatus::Failed,
            _ => BackendStatus::Disabled,
        }
    }
}

impl BackendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendStatus::Healthy => "healthy",
            BackendStatus::Degraded => "degraded",
            BackendStatus::Failed => "failed",
            BackendStatus::Disabled => "disabled",
        }
    }

    /// Metric score: 1 healthy, 0.5 degraded, 0 otherwise.
    pub fn score(&self) -> f64 {
        match self {
            BackendStatus::Healthy => 1.0,
            BackendStatus::Degraded => 0.5,
            BackendStatus::Failed | BackendStatus::Disabled => 0.0,
        }
    }
}

/// One registered adapter instance.
pub struct BackendHandle {
    name: String,
    instance: String,
    priority: u32,
    enabled: AtomicBool,
    status: AtomicU8,
    load: AtomicUsize,
    calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    adapter: Arc<dyn Backend>,
    breaker: Arc<CircuitBreaker>,
    health: Mutex<HealthRecord>,
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle")
            .field("name", &self.name)
            .field("instance", &self.instance)
            .field("priority", &self.priority)
            .field("status", &self.status())
            .field("load", &self.load())
            .finish()
    }
}

impl BackendHandle {
    pub(crate) fn new(
        instance: String,
        priority: u32,
        enabled: bool,
        adapter: Arc<dyn Backend>,
        breaker: Arc<CircuitBreaker>,
        health: HealthRecord,
    ) -> Self {
        let status = if enabled {
            BackendStatus::Healthy
        } else {
            BackendStatus::Disabled
        };
        Self {
            name: adapter.name().to_string(),
            instance,
            priority,
            enabled: AtomicBool::new(enabled),
            status: AtomicU8::new(status as u8),
            load: AtomicUsize::new(0),
            calls: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            adapter,
            breaker,
            health: Mutex::new(health),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn adapter(&self) -> &Arc<dyn Backend> {
        &self.adapter
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub(crate) fn health(&self) -> &Mutex<HealthRecord> {
        &self.health
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> BackendStatus {
        BackendStatus::from(self.status.load(Ordering::Relaxed))
    }

    /// Enabled and not Failed.
    pub fn is_selectable(&self) -> bool {
        self.is_enabled()
            && matches!(
                self.status(),
                BackendStatus::Healthy | BackendStatus::Degraded
            )
    }

    pub fn load(&self) -> usize {
        self.load.load(Ordering::Relaxed)
    }

    pub fn counters(&self) -> (u64, u64, u64) {
        (
            self.calls.load(Ordering::Relaxed),
            self.successes.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
        )
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        let status = if enabled {
            self.health.lock().derived_status()
        } else {
            BackendStatus::Disabled
        };
        self.store_status(status);
    }

    /// Set a health-derived status; a disabled handle stays Disabled.
    pub(crate) fn set_status(&self, status: BackendStatus) -> bool {
        if !self.is_enabled() || status == BackendStatus::Disabled {
            return false;
        }
        self.store_status(status)
    }

    fn store_status(&self, status: BackendStatus) -> bool {
        let previous = BackendStatus::from(self.status.swap(status as u8, Ordering::Relaxed));
        metrics::record_backend_health(&self.instance, status.score());
        if previous != status {
            tracing::info!(
                backend = %self.name,
                instance = %self.instance,
                from = previous.as_str(),
                to = status.as_str(),
                "Backend status changed"
            );
            true
        } else {
            false
        }
    }

    /// Start a call; the returned guard holds one unit of load until dropped.
    pub fn begin_call(self: &Arc<Self>) -> BackendCall {
        self.load.fetch_add(1, Ordering::Relaxed);
        self.calls.fetch_add(1, Ordering::Relaxed);
        BackendCall {
            handle: self.clone(),
        }
    }
}

/// How a call ended, as far as the breaker is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    /// The backend answered but the result says nothing about its health
    /// (permanent rejection, cancellation); a half-open trial slot is freed.
    Neutral,
}

/// A RAII guard that manages the in-flight load count.
#[derive(Debug)]
pub struct BackendCall {
    handle: Arc<BackendHandle>,
}

impl BackendCall {
    pub fn handle(&self) -> &Arc<BackendHandle> {
        &self.handle
    }

    pub(crate) fn record(&self, outcome: CallOutcome) {
        match outcome {
            CallOutcome::Success => {
                self.handle.successes.fetch_add(1, Ordering::Relaxed);
                self.handle.breaker.record_success();
            }
            CallOutcome::Failure => {
                self.handle.failures.fetch_add(1, Ordering::Relaxed);
                self.handle.breaker.record_failure();
            }
            CallOutcome::Neutral => self.handle.breaker.abandon_trial(),
        }
    }
}

impl Deref for BackendCall {
    type Target = BackendHandle;
    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for BackendCall {
    fn drop(&mut self) {
        self.handle.load.fetch_sub(1, Ordering::Relaxed);
    }
}
