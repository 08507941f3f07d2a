//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the retrieval core.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the retrieval core.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CoreConfig {
    /// Scheduler settings (concurrency, queue bounds, history).
    pub orchestrator: OrchestratorConfig,

    /// Retry backoff settings.
    pub retries: RetryConfig,

    /// Per-backend circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Per-backend admission control.
    pub rate_limit: RateLimitConfig,

    /// Per-caller submission quota.
    pub caller_rate_limit: CallerRateLimitConfig,

    /// Backend selection settings.
    pub registry: RegistryConfig,

    /// Health probing and alerting.
    pub health_check: HealthCheckConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Per-backend overrides, keyed by backend name.
    pub backends: Vec<BackendConfig>,
}

impl CoreConfig {
    /// Find the override block for a backend, if any.
    pub fn backend(&self, name: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.name == name)
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Size of the worker pool (maximum concurrent executions).
    pub max_concurrency: usize,

    /// Maximum number of pending jobs accepted from fresh submissions.
    pub max_queue_size: usize,

    /// Attempts allowed when a submission does not specify its own.
    pub default_max_attempts: u32,

    /// Per-attempt execution timeout in seconds.
    pub attempt_timeout_secs: u64,

    /// Upper bound on the pause after a job is requeued for lack of quota.
    pub rate_limit_backoff_ms: u64,

    /// Number of terminal jobs kept for status queries.
    pub history_capacity: usize,

    /// Maximum age of a terminal job before it is evicted.
    pub history_max_age_secs: u64,

    /// Interval of the maintenance task (history, caches, buckets).
    pub cleanup_interval_secs: u64,

    /// Capacity of the lifecycle event broadcast channel.
    pub event_buffer: usize,

    /// Time allowed for in-flight work to drain at shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            max_queue_size: 100,
            default_max_attempts: 3,
            attempt_timeout_secs: 300,
            rate_limit_backoff_ms: 250,
            history_capacity: 1000,
            history_max_age_secs: 24 * 3600,
            cleanup_interval_secs: 3600,
            event_buffer: 1024,
            shutdown_grace_secs: 30,
        }
    }
}

impl OrchestratorConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(self.rate_limit_backoff_ms)
    }

    pub fn history_max_age(&self) -> Duration {
        Duration::from_secs(self.history_max_age_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry in milliseconds.
    pub base_delay_ms: u64,

    /// Multiplier applied per additional attempt.
    pub backoff_factor: f64,

    /// Maximum delay between attempts in milliseconds.
    pub max_delay_ms: u64,

    /// Random jitter added to each delay, as a fraction of the delay.
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
            jitter_ratio: 0.1,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Seconds after the last failure before a trial call is allowed.
    pub recovery_timeout_secs: u64,

    /// Consecutive trial successes that close the circuit.
    pub success_threshold: u32,

    /// Concurrent trial calls admitted while half-open.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            success_threshold: 3,
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

/// Admission control algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    TokenBucket,
    SlidingWindow,
    FixedWindow,
    LeakyBucket,
}

impl std::fmt::Display for RateLimitAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RateLimitAlgorithm::TokenBucket => "token_bucket",
            RateLimitAlgorithm::SlidingWindow => "sliding_window",
            RateLimitAlgorithm::FixedWindow => "fixed_window",
            RateLimitAlgorithm::LeakyBucket => "leaky_bucket",
        };
        f.write_str(name)
    }
}

/// A request quota: `max_requests` per `window_secs`, plus `burst` extra.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub max_requests: u32,
    pub window_secs: u64,
    pub burst: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_secs: 60,
            burst: 0,
        }
    }
}

impl QuotaConfig {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window_secs: window.as_secs(),
            burst: 0,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Maximum cost admitted in one window including the burst allowance.
    pub fn capacity(&self) -> u64 {
        self.max_requests as u64 + self.burst as u64
    }
}

/// Per-backend rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable per-backend admission control.
    pub enabled: bool,

    /// Algorithm used for every key.
    pub algorithm: RateLimitAlgorithm,

    /// Default quota applied to keys without an override.
    pub quota: QuotaConfig,

    /// Idle time after which a key's bucket is evicted.
    pub bucket_ttl_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: RateLimitAlgorithm::TokenBucket,
            quota: QuotaConfig::default(),
            bucket_ttl_secs: 600,
        }
    }
}

impl RateLimitConfig {
    pub fn bucket_ttl(&self) -> Duration {
        Duration::from_secs(self.bucket_ttl_secs)
    }
}

/// Per-caller submission quota.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CallerRateLimitConfig {
    pub enabled: bool,
    pub algorithm: RateLimitAlgorithm,
    pub quota: QuotaConfig,
    pub bucket_ttl_secs: u64,
}

impl Default for CallerRateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: RateLimitAlgorithm::SlidingWindow,
            quota: QuotaConfig {
                max_requests: 5,
                window_secs: 60,
                burst: 0,
            },
            bucket_ttl_secs: 600,
        }
    }
}

impl From<&CallerRateLimitConfig> for RateLimitConfig {
    fn from(caller: &CallerRateLimitConfig) -> Self {
        Self {
            enabled: caller.enabled,
            algorithm: caller.algorithm,
            quota: caller.quota,
            bucket_ttl_secs: caller.bucket_ttl_secs,
        }
    }
}

/// Instance selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    RoundRobin,
    Priority,
    Random,
    LeastLoaded,
    HealthAware,
}

/// Backend registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Strategy used to pick among interchangeable instances.
    pub strategy: SelectionStrategy,

    /// How long a target → backend resolution stays cached.
    pub target_cache_ttl_secs: u64,

    /// Maximum number of cached resolutions.
    pub target_cache_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::Priority,
            target_cache_ttl_secs: 3600,
            target_cache_capacity: 10_000,
        }
    }
}

impl RegistryConfig {
    pub fn target_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.target_cache_ttl_secs)
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable periodic health probes.
    pub enabled: bool,

    /// Probe interval in seconds.
    pub interval_secs: u64,

    /// Probe timeout in seconds.
    pub timeout_secs: u64,

    /// Number of probe samples kept per backend.
    pub history_size: usize,

    /// Number of recent probes used for the success rate.
    pub success_rate_window: usize,

    /// Probes required before the success-rate rule applies.
    pub min_probes_for_rate: usize,

    /// Success rate below which an alert is raised (0.0 - 1.0).
    pub low_success_rate: f64,

    /// Consecutive failures that raise an alert and mark the backend degraded.
    pub failure_alert_threshold: u32,

    /// Consecutive failures that escalate the alert and mark the backend failed.
    pub failure_escalation_threshold: u32,

    /// Consecutive successes that resolve alerts and restore health.
    pub recovery_threshold: u32,

    /// Mean probe latency (last 10 probes) above which an alert is raised.
    pub latency_alert_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            timeout_secs: 10,
            history_size: 100,
            success_rate_window: 20,
            min_probes_for_rate: 10,
            low_success_rate: 0.5,
            failure_alert_threshold: 3,
            failure_escalation_threshold: 5,
            recovery_threshold: 3,
            latency_alert_ms: 30_000,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// Admin API bind address.
    pub bind_address: String,

    /// Request timeout for admin handlers in seconds.
    pub request_timeout_secs: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:8081".to_string(),
            request_timeout_secs: 10,
        }
    }
}

/// Per-backend overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Backend name the overrides apply to.
    pub name: String,

    /// Selection priority (lower = preferred).
    #[serde(default = "default_priority")]
    pub priority: u32,

    /// Whether the backend starts enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Backend-specific quota replacing the default one.
    #[serde(default)]
    pub rate_limit: Option<QuotaConfig>,

    /// Register a simulated adapter under this name (demo / load testing).
    #[serde(default)]
    pub simulation: Option<SimulationConfig>,
}

pub(crate) fn default_priority() -> u32 {
    100
}

fn default_enabled() -> bool {
    true
}

/// Behaviour of a simulated backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Hosts served by the backend (suffix match, e.g. "example.com").
    pub domains: Vec<String>,

    /// Latency of each execution in milliseconds.
    pub latency_ms: u64,

    /// Probability that an execution fails transiently (0.0 - 1.0).
    pub failure_rate: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            latency_ms: 100,
            failure_rate: 0.0,
        }
    }
}
