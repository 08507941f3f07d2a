//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration and build every subsystem in dependency order
//! - Register backend adapters, applying per-backend overrides from config
//! - Start background tasks (workers, health probes, admin listener)
//! - Tear everything down in reverse order
//!
//! # Design Decisions
//! - Fail fast: invalid configuration is rejected by `new`
//! - No global state; the daemon and tests each own a `RetrievalCore`
//! - The admin listener starts last (traffic only when ready)

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::task::TaskTracker;

use crate::admin::{admin_router, AdminState};
use crate::backends::simulated::SimulatedBackend;
use crate::backends::{Backend, BackendHandle, BackendOptions, BackendRegistry};
use crate::config::{validate_config, ConfigError, CoreConfig};
use crate::health::HealthMonitor;
use crate::lifecycle::Shutdown;
use crate::observability::snapshot::StatsSnapshot;
use crate::orchestrator::Orchestrator;

pub struct RetrievalCore {
    config: CoreConfig,
    registry: Arc<BackendRegistry>,
    orchestrator: Arc<Orchestrator>,
    health: Arc<HealthMonitor>,
    shutdown: Shutdown,
    tasks: TaskTracker,
}

impl RetrievalCore {
    pub fn new(config: CoreConfig) -> Result<Self, ConfigError> {
        validate_config(&config)?;

        let registry = Arc::new(BackendRegistry::from_config(&config));
        let orchestrator = Arc::new(Orchestrator::new(&config, registry.clone())?);
        let health = Arc::new(HealthMonitor::new(
            registry.clone(),
            config.health_check.clone(),
        ));

        tracing::info!(
            max_concurrency = config.orchestrator.max_concurrency,
            strategy = ?config.registry.strategy,
            algorithm = %config.rate_limit.algorithm,
            "Core initialized"
        );

        Ok(Self {
            config,
            registry,
            orchestrator,
            health,
            shutdown: Shutdown::new(),
            tasks: TaskTracker::new(),
        })
    }

    /// Register an adapter with the priority and enabled flag configured
    /// for its name, if any.
    pub fn register(&self, adapter: Arc<dyn Backend>) -> Arc<BackendHandle> {
        let options = self
            .config
            .backend(adapter.name())
            .map(|b| BackendOptions {
                priority: b.priority,
                enabled: b.enabled,
            })
            .unwrap_or_default();
        self.registry.register_with(adapter, options)
    }

    /// Register a simulated adapter for every `[[backends]]` entry with a
    /// `simulation` block; returns how many were registered.
    pub fn register_simulated(&self) -> usize {
        let mut registered = 0;
        for backend in &self.config.backends {
            if let Some(simulation) = &backend.simulation {
                self.register(Arc::new(SimulatedBackend::new(&backend.name, simulation)));
                registered += 1;
            }
        }
        registered
    }

    /// Start the worker pool and the health monitor.
    pub fn start(&self) {
        self.orchestrator.start();
        let health = self.health.clone();
        self.tasks.spawn(health.run(self.shutdown.subscribe()));
        tracing::info!(backends = self.registry.len(), "Core started");
    }

    /// Bind the admin API and serve it until shutdown.
    pub async fn serve_admin(&self) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(&self.config.admin.bind_address).await?;
        let addr = listener.local_addr()?;
        let app = admin_router(
            AdminState {
                orchestrator: self.orchestrator.clone(),
                health: self.health.clone(),
            },
            &self.config.admin,
        );

        let mut stop = self.shutdown.subscribe();
        self.tasks.spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin server failed");
            }
            tracing::info!("Admin server stopped");
        });

        tracing::info!(address = %addr, "Admin API listening");
        Ok(addr)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot::collect(&self.orchestrator, &self.health)
    }

    /// Drain the orchestrator, then stop probes and the admin listener.
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
        self.shutdown.trigger();
        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!("Core shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, SimulationConfig};
    use crate::jobs::{JobRequest, JobStatus};

    fn config() -> CoreConfig {
        let mut config = CoreConfig::default();
        config.health_check.enabled = false;
        config.backends.push(BackendConfig {
            name: "sim".to_string(),
            priority: 7,
            enabled: true,
            rate_limit: None,
            simulation: Some(SimulationConfig {
                domains: vec!["example.com".to_string()],
                latency_ms: 10,
                failure_rate: 0.0,
            }),
        });
        config
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut bad = config();
        bad.orchestrator.max_concurrency = 0;
        assert!(matches!(
            RetrievalCore::new(bad),
            Err(ConfigError::Validation(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_runs_simulated_job() {
        let core = RetrievalCore::new(config()).unwrap();
        assert_eq!(core.register_simulated(), 1);
        assert_eq!(core.registry().handles()[0].priority(), 7);

        core.start();
        let mut events = core.orchestrator().subscribe();
        let id = core
            .orchestrator()
            .submit(JobRequest::new("https://example.com/page"))
            .unwrap();

        loop {
            let event = events.recv().await.unwrap();
            if event.job_id() == id && event.is_terminal() {
                break;
            }
        }
        let job = core.orchestrator().status(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.unwrap()["backend"], "sim");

        core.shutdown().await;
        assert_eq!(core.stats().orchestrator.completed, 1);
    }
}
