//! Retrieval core daemon.
//!
//! Composition root: loads configuration, registers backend adapters
//! explicitly, starts the scheduler, health probes and admin API, and runs a
//! graceful shutdown on SIGINT/SIGTERM.
//!
//! # Architecture Overview
//!
//! ```text
//!     submit ──▶ Orchestrator ──▶ JobQueue (Urgent > High > Normal > Low)
//!                    │
//!                    ▼ worker pool (max_concurrency)
//!              BackendRegistry.select_for(target)
//!                    │
//!                    ├──▶ RateLimiter (per backend)
//!                    ├──▶ CircuitBreaker (per backend)
//!                    ▼
//!              Backend adapter ──▶ Completed | Retrying | Failed
//!
//!     HealthMonitor ──probes──▶ adapters ──▶ HealthRecord / breaker / status
//!     Admin API (axum) ──▶ submit / status / cancel / stats snapshot
//! ```

use std::path::PathBuf;

use clap::Parser;

use retrieval_core::config::{load_config, CoreConfig};
use retrieval_core::lifecycle::{shutdown_signal, RetrievalCore};
use retrieval_core::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "retrieval-core")]
#[command(about = "Resilient multi-backend job scheduler", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => CoreConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        "retrieval-core starting"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let admin_enabled = config.admin.enabled;
    let core = RetrievalCore::new(config)?;

    let registered = core.register_simulated();
    if registered == 0 {
        tracing::warn!("No backends configured; every submission will be rejected");
    }

    core.start();
    if admin_enabled {
        core.serve_admin().await?;
    }

    shutdown_signal().await;
    core.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
