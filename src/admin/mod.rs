//! Admin HTTP API.
//!
//! Submission, query and cancellation of jobs plus read-only views of the
//! queue, backends and the stats snapshot. There is no authentication; bind
//! the listener to a trusted interface.

pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::AdminConfig;
use crate::health::HealthMonitor;
use crate::orchestrator::Orchestrator;
use self::handlers::*;

#[derive(Clone)]
pub struct AdminState {
    pub orchestrator: Arc<Orchestrator>,
    pub health: Arc<HealthMonitor>,
}

pub fn admin_router(state: AdminState, config: &AdminConfig) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/stats", get(get_stats))
        .route("/admin/backends", get(get_backends))
        .route("/admin/backends/{name}/enabled", post(set_backend_enabled))
        .route("/admin/queue", get(get_queue))
        .route("/admin/jobs", post(submit_job))
        .route("/admin/jobs/{id}", get(get_job).delete(cancel_job))
        .with_state(state)
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
        .layer(TraceLayer::new_for_http())
}
