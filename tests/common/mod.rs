//! Shared utilities for integration tests: scripted backends and helpers.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use retrieval_core::backends::{Backend, ExecutionContext, ProbeOutcome};
use retrieval_core::config::CoreConfig;
use retrieval_core::{Job, JobError, JobId, Orchestrator};

/// What one execution does.
#[derive(Debug, Clone)]
pub enum Step {
    Succeed,
    Fail(JobError),
    /// Succeed after a delay.
    Sleep(Duration),
    /// Wait until cancelled.
    Block,
    Panic,
}

/// A backend that plays a script of steps, one per execution, then repeats
/// its fallback step.
pub struct ScriptedBackend {
    name: String,
    suffix: String,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicU32,
    executed: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            suffix: String::new(),
            script: Mutex::new(VecDeque::new()),
            fallback: Step::Succeed,
            calls: AtomicU32::new(0),
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Only accept targets ending in `suffix`.
    pub fn suffix(mut self, suffix: &str) -> Self {
        self.suffix = suffix.to_string();
        self
    }

    pub fn script(self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.script.lock().extend(steps);
        self
    }

    pub fn fallback(mut self, step: Step) -> Self {
        self.fallback = step;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Targets in the order their executions started.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_handle(&self, target: &str) -> bool {
        target.ends_with(&self.suffix)
    }

    async fn execute(&self, job: &Job, ctx: &ExecutionContext) -> Result<Value, JobError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().push(job.target.clone());
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::Succeed => {}
            Step::Fail(error) => return Err(error),
            Step::Sleep(delay) => tokio::time::sleep(delay).await,
            Step::Block => {
                ctx.cancelled().await;
                return Err(JobError::transient("cancelled"));
            }
            Step::Panic => panic!("adapter exploded"),
        }
        ctx.report_progress(100.0);
        Ok(json!({ "backend": self.name, "target": job.target }))
    }

    async fn health_probe(&self) -> ProbeOutcome {
        ProbeOutcome::healthy(Duration::from_millis(1))
    }
}

/// Defaults tuned for tests: no probes, fast deterministic retries.
pub fn test_config() -> CoreConfig {
    let mut config = CoreConfig::default();
    config.health_check.enabled = false;
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 1_000;
    config.retries.jitter_ratio = 0.0;
    config.orchestrator.shutdown_grace_secs = 1;
    config
}

/// Poll until the job reaches a terminal state.
pub async fn wait_terminal(orch: &Orchestrator, id: &JobId) -> Job {
    for _ in 0..100_000 {
        if let Some(job) = orch.status(id) {
            if job.status.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {id} never finished");
}

/// Poll until `f` holds.
pub async fn wait_until(mut f: impl FnMut() -> bool) {
    for _ in 0..100_000 {
        if f() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never held");
}

pub fn orchestrator(config: &CoreConfig, backends: Vec<Arc<dyn Backend>>) -> Orchestrator {
    let registry = Arc::new(retrieval_core::BackendRegistry::from_config(config));
    for backend in backends {
        registry.register(backend);
    }
    Orchestrator::new(config, registry).unwrap()
}
