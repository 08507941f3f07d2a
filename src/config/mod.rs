//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → CoreConfig (validated, immutable)
//!     → handed to RetrievalCore::new, which builds every service from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; services are constructed from it once
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, BackendConfig, CallerRateLimitConfig, CircuitBreakerConfig, CoreConfig,
    HealthCheckConfig, LogFormat, ObservabilityConfig, OrchestratorConfig, QuotaConfig,
    RateLimitAlgorithm, RateLimitConfig, RegistryConfig, RetryConfig, SelectionStrategy,
    SimulationConfig,
};
pub use validation::{validate_config, ValidationError};
