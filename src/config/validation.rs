//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, windows non-empty, ratios in range)
//! - Check per-backend overrides for duplicates and bad quotas
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: CoreConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{CoreConfig, QuotaConfig};

/// A single semantic violation found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: String },

    #[error("{field} is out of range: {reason}")]
    OutOfRange { field: String, reason: String },

    #[error("{field} is not a valid socket address: {value}")]
    InvalidAddress { field: String, value: String },

    #[error("duplicate backend override: {0}")]
    DuplicateBackend(String),

    #[error("backend override has an empty name")]
    EmptyBackendName,
}

fn zero(field: &str) -> ValidationError {
    ValidationError::Zero {
        field: field.to_string(),
    }
}

fn out_of_range(field: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::OutOfRange {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Validate a complete configuration, collecting every violation.
pub fn validate_config(config: &CoreConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let orch = &config.orchestrator;
    if orch.max_concurrency == 0 {
        errors.push(zero("orchestrator.max_concurrency"));
    }
    if orch.max_queue_size == 0 {
        errors.push(zero("orchestrator.max_queue_size"));
    }
    if orch.default_max_attempts == 0 {
        errors.push(zero("orchestrator.default_max_attempts"));
    }
    if orch.attempt_timeout_secs == 0 {
        errors.push(zero("orchestrator.attempt_timeout_secs"));
    }
    if orch.history_capacity == 0 {
        errors.push(zero("orchestrator.history_capacity"));
    }
    if orch.cleanup_interval_secs == 0 {
        errors.push(zero("orchestrator.cleanup_interval_secs"));
    }
    if orch.event_buffer == 0 {
        errors.push(zero("orchestrator.event_buffer"));
    }

    let retries = &config.retries;
    if retries.backoff_factor < 1.0 || !retries.backoff_factor.is_finite() {
        errors.push(out_of_range("retries.backoff_factor", "must be >= 1.0"));
    }
    if !(0.0..=1.0).contains(&retries.jitter_ratio) {
        errors.push(out_of_range("retries.jitter_ratio", "must be within [0, 1]"));
    }
    if retries.max_delay_ms < retries.base_delay_ms {
        errors.push(out_of_range(
            "retries.max_delay_ms",
            "must not be smaller than base_delay_ms",
        ));
    }

    let cb = &config.circuit_breaker;
    if cb.failure_threshold == 0 {
        errors.push(zero("circuit_breaker.failure_threshold"));
    }
    if cb.success_threshold == 0 {
        errors.push(zero("circuit_breaker.success_threshold"));
    }
    if cb.half_open_max_calls == 0 {
        errors.push(zero("circuit_breaker.half_open_max_calls"));
    }

    validate_quota("rate_limit.quota", &config.rate_limit.quota, &mut errors);
    if config.rate_limit.bucket_ttl_secs < config.rate_limit.quota.window_secs {
        errors.push(out_of_range(
            "rate_limit.bucket_ttl_secs",
            "must be at least the quota window",
        ));
    }
    validate_quota(
        "caller_rate_limit.quota",
        &config.caller_rate_limit.quota,
        &mut errors,
    );
    if config.caller_rate_limit.bucket_ttl_secs < config.caller_rate_limit.quota.window_secs {
        errors.push(out_of_range(
            "caller_rate_limit.bucket_ttl_secs",
            "must be at least the quota window",
        ));
    }

    if config.registry.target_cache_capacity == 0 {
        errors.push(zero("registry.target_cache_capacity"));
    }

    let health = &config.health_check;
    if health.enabled {
        if health.interval_secs == 0 {
            errors.push(zero("health_check.interval_secs"));
        }
        if health.timeout_secs == 0 {
            errors.push(zero("health_check.timeout_secs"));
        }
    }
    if health.history_size == 0 {
        errors.push(zero("health_check.history_size"));
    }
    if health.success_rate_window == 0 {
        errors.push(zero("health_check.success_rate_window"));
    }
    if !(0.0..=1.0).contains(&health.low_success_rate) {
        errors.push(out_of_range(
            "health_check.low_success_rate",
            "must be within [0, 1]",
        ));
    }
    if health.failure_alert_threshold == 0 {
        errors.push(zero("health_check.failure_alert_threshold"));
    }
    if health.failure_escalation_threshold < health.failure_alert_threshold {
        errors.push(out_of_range(
            "health_check.failure_escalation_threshold",
            "must not be smaller than failure_alert_threshold",
        ));
    }
    if health.recovery_threshold == 0 {
        errors.push(zero("health_check.recovery_threshold"));
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address".to_string(),
            value: obs.metrics_address.clone(),
        });
    }
    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidAddress {
                field: "admin.bind_address".to_string(),
                value: config.admin.bind_address.clone(),
            });
        }
        if config.admin.request_timeout_secs == 0 {
            errors.push(zero("admin.request_timeout_secs"));
        }
    }

    let mut seen = HashSet::new();
    for backend in &config.backends {
        if backend.name.trim().is_empty() {
            errors.push(ValidationError::EmptyBackendName);
            continue;
        }
        if !seen.insert(backend.name.as_str()) {
            errors.push(ValidationError::DuplicateBackend(backend.name.clone()));
        }
        if let Some(quota) = &backend.rate_limit {
            validate_quota(
                &format!("backends.{}.rate_limit", backend.name),
                quota,
                &mut errors,
            );
        }
        if let Some(sim) = &backend.simulation {
            if !(0.0..=1.0).contains(&sim.failure_rate) {
                errors.push(out_of_range(
                    &format!("backends.{}.simulation.failure_rate", backend.name),
                    "must be within [0, 1]",
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Check a quota block; shared with limiter construction.
pub fn validate_quota(field: &str, quota: &QuotaConfig, errors: &mut Vec<ValidationError>) {
    if quota.max_requests == 0 {
        errors.push(zero(&format!("{field}.max_requests")));
    }
    if quota.window_secs == 0 {
        errors.push(zero(&format!("{field}.window_secs")));
    }
}
