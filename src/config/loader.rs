//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::CoreConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<Vec<ValidationError>> for ConfigError {
    fn from(errors: Vec<ValidationError>) -> Self {
        ConfigError::Validation(errors)
    }
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<CoreConfig, ConfigError> {
    let config: CoreConfig = toml::from_str(content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<CoreConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{LogFormat, RateLimitAlgorithm, SelectionStrategy};
    use std::io::Write;

    #[test]
    fn test_load_minimal_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[orchestrator]\nmax_concurrency = 2").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.orchestrator.max_concurrency, 2);
        assert_eq!(config.orchestrator.max_queue_size, 100);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn test_load_full_file() {
        let toml = r#"
            [rate_limit]
            algorithm = "sliding_window"
            quota = { max_requests = 5, window_secs = 60 }

            [registry]
            strategy = "least_loaded"

            [observability]
            log_format = "json"
            metrics_enabled = false

            [[backends]]
            name = "archive"
            priority = 10
            rate_limit = { max_requests = 2, window_secs = 1 }

            [backends.simulation]
            domains = ["example.com"]
            latency_ms = 20
        "#;

        let config = parse_config(toml).unwrap();
        assert_eq!(config.rate_limit.algorithm, RateLimitAlgorithm::SlidingWindow);
        assert_eq!(config.registry.strategy, SelectionStrategy::LeastLoaded);
        assert_eq!(config.observability.log_format, LogFormat::Json);

        let archive = config.backend("archive").unwrap();
        assert_eq!(archive.priority, 10);
        assert!(archive.enabled);
        assert_eq!(archive.rate_limit.unwrap().max_requests, 2);
        assert_eq!(archive.simulation.as_ref().unwrap().domains, vec!["example.com"]);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = parse_config("[circuit_breaker]\nsuccess_threshold = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 1));
        assert!(err.to_string().contains("circuit_breaker.success_threshold"));
    }

    #[test]
    fn test_unknown_enum_is_parse_error() {
        let err = parse_config("[rate_limit]\nalgorithm = \"gcra\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/core.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
