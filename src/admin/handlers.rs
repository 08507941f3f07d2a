use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::admin::AdminState;
use crate::backends::BackendStats;
use crate::health::HealthSummary;
use crate::jobs::{Job, JobId, JobRequest, Priority, QueueCounts};
use crate::observability::snapshot::StatsSnapshot;
use crate::orchestrator::SubmitError;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

pub struct ApiError {
    status: StatusCode,
    message: String,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    fn not_found(what: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{what} not found"))
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        let status = match &err {
            SubmitError::EmptyTarget => StatusCode::BAD_REQUEST,
            SubmitError::Unsupported(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SubmitError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            SubmitError::QueueFull(_) | SubmitError::ShuttingDown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        let retry_after_secs = match &err {
            SubmitError::RateLimited { retry_after_ms, .. } => Some(retry_after_ms.div_ceil(1000)),
            _ => None,
        };
        Self {
            status,
            message: err.to_string(),
            retry_after_secs,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response();
        if let Some(secs) = self.retry_after_secs {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub backends: usize,
    pub queue: QueueCounts,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let status = if state.orchestrator.is_shutting_down() {
        "shutting_down"
    } else {
        "operational"
    };
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: status.to_string(),
        backends: state.orchestrator.registry().len(),
        queue: state.orchestrator.queue_counts(),
    })
}

pub async fn get_stats(State(state): State<AdminState>) -> Json<StatsSnapshot> {
    Json(StatsSnapshot::collect(&state.orchestrator, &state.health))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackendView {
    #[serde(flatten)]
    pub stats: BackendStats,
    pub health: Option<HealthSummary>,
}

pub async fn get_backends(State(state): State<AdminState>) -> Json<Vec<BackendView>> {
    let health = state.health.snapshot();
    let views = state
        .orchestrator
        .registry()
        .stats()
        .backends
        .into_iter()
        .map(|stats| {
            let summary = health
                .iter()
                .find(|h| h.instance == stats.instance)
                .map(|h| h.health.clone());
            BackendView {
                stats,
                health: summary,
            }
        })
        .collect();
    Json(views)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnabledBody {
    pub enabled: bool,
}

pub async fn set_backend_enabled(
    State(state): State<AdminState>,
    Path(name): Path<String>,
    Json(body): Json<EnabledBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.orchestrator.registry().set_enabled(&name, body.enabled) {
        return Err(ApiError::not_found(format!("backend {name}")));
    }
    Ok(Json(serde_json::json!({
        "name": name,
        "enabled": body.enabled,
    })))
}

#[derive(Debug, Deserialize)]
pub struct QueueParams {
    /// Number of recently finished jobs to include.
    #[serde(default)]
    pub recent: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueView {
    pub counts: QueueCounts,
    pub pending: Vec<Job>,
    pub in_flight: Vec<Job>,
    pub recent: Vec<Job>,
}

pub async fn get_queue(
    State(state): State<AdminState>,
    Query(params): Query<QueueParams>,
) -> Json<QueueView> {
    let snapshot = state.orchestrator.queue_snapshot();
    Json(QueueView {
        counts: snapshot.counts(),
        pending: snapshot.pending,
        in_flight: snapshot.in_flight,
        recent: state.orchestrator.recent(params.recent),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitBody {
    pub target: String,
    pub action: Option<String>,
    pub priority: Option<Priority>,
    pub max_attempts: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub caller: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Submitted {
    pub job_id: JobId,
}

pub async fn submit_job(
    State(state): State<AdminState>,
    Json(body): Json<SubmitBody>,
) -> Result<(StatusCode, Json<Submitted>), ApiError> {
    let mut request = JobRequest::new(body.target);
    if let Some(action) = body.action {
        request = request.action(action);
    }
    if let Some(priority) = body.priority {
        request = request.priority(priority);
    }
    if let Some(max_attempts) = body.max_attempts {
        request = request.max_attempts(max_attempts);
    }
    if let Some(secs) = body.timeout_secs {
        request = request.timeout(Duration::from_secs(secs));
    }
    if let Some(caller) = body.caller {
        request = request.caller(caller);
    }

    let job_id = state.orchestrator.submit(request)?;
    Ok((StatusCode::ACCEPTED, Json(Submitted { job_id })))
}

pub async fn get_job(
    State(state): State<AdminState>,
    Path(id): Path<JobId>,
) -> Result<Json<Job>, ApiError> {
    state
        .orchestrator
        .status(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("job {id}")))
}

pub async fn cancel_job(
    State(state): State<AdminState>,
    Path(id): Path<JobId>,
) -> Result<Json<Job>, ApiError> {
    if state.orchestrator.cancel(&id) {
        return state
            .orchestrator
            .status(&id)
            .map(Json)
            .ok_or_else(|| ApiError::not_found(format!("job {id}")));
    }
    match state.orchestrator.status(&id) {
        Some(job) => Err(ApiError::new(
            StatusCode::CONFLICT,
            format!("job {id} already {}", job.status),
        )),
        None => Err(ApiError::not_found(format!("job {id}"))),
    }
}
