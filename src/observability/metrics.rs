//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define core metrics (jobs, retries, rate limiting, breakers, health)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-backend and aggregate metrics
//!
//! # Metrics
//! - `core_jobs_submitted_total` (counter): accepted submissions by priority
//! - `core_jobs_finished_total` (counter): terminal jobs by outcome
//! - `core_job_duration_seconds` (histogram): submit-to-terminal latency by outcome
//! - `core_job_retries_total` (counter): scheduled retries by error kind
//! - `core_rate_limited_total` (counter): rejected acquisitions by key
//! - `core_queue_depth` (gauge): pending jobs
//! - `core_jobs_in_flight` (gauge): dispatched but not terminal
//! - `core_breaker_transitions_total` (counter): breaker transitions by backend, state
//! - `core_backend_health` (gauge): 1=healthy, 0.5=degraded, 0=failed/disabled
//! - `core_health_probe_seconds` (histogram): probe latency by backend
//! - `core_alerts_raised_total` (counter): alerts by backend, kind
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests never need an exporter

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_job_submitted(priority: &'static str) {
    counter!("core_jobs_submitted_total", "priority" => priority).increment(1);
}

pub fn record_job_finished(outcome: &'static str, elapsed: Duration) {
    counter!("core_jobs_finished_total", "outcome" => outcome).increment(1);
    histogram!("core_job_duration_seconds", "outcome" => outcome).record(elapsed.as_secs_f64());
}

pub fn record_retry(kind: &'static str) {
    counter!("core_job_retries_total", "kind" => kind).increment(1);
}

/// `limiter` label of the per-backend limiter.
pub const BACKEND_LIMITER: &str = "backend";
/// `limiter` label of the per-caller submission limiter.
pub const CALLER_LIMITER: &str = "caller";

/// Labelled by limiter, never by key: caller ids are unbounded.
pub fn record_rate_limited(limiter: &'static str) {
    counter!("core_rate_limited_total", "limiter" => limiter).increment(1);
}

pub fn record_queue_depth(depth: usize) {
    gauge!("core_queue_depth").set(depth as f64);
}

pub fn record_in_flight(count: usize) {
    gauge!("core_jobs_in_flight").set(count as f64);
}

pub fn record_breaker_transition(backend: &str, state: &'static str) {
    counter!(
        "core_breaker_transitions_total",
        "backend" => backend.to_string(),
        "state" => state
    )
    .increment(1);
}

/// `score` is 1.0 healthy, 0.5 degraded, 0.0 failed or disabled.
pub fn record_backend_health(backend: &str, score: f64) {
    gauge!("core_backend_health", "backend" => backend.to_string()).set(score);
}

pub fn record_health_probe(backend: &str, latency: Duration) {
    histogram!("core_health_probe_seconds", "backend" => backend.to_string())
        .record(latency.as_secs_f64());
}

pub fn record_alert(backend: &str, kind: &'static str) {
    counter!(
        "core_alerts_raised_total",
        "backend" => backend.to_string(),
        "kind" => kind
    )
    .increment(1);
}
