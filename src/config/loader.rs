//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation failed: {}", format_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: GatewayConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:9000"

            [[discovery.services]]
            service_id = "orders"
            urls = ["http://127.0.0.1:3001"]
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.forwarding.max_attempts, 3);
        assert_eq!(config.pool.max_connections, 10);
        assert_eq!(config.discovery.services.len(), 1);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn validation_failure_lists_every_field() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "nope"

            [router]
            protocol = "gopher"
            "#,
        )
        .unwrap();

        let err = validate_config(&config)
            .map_err(ConfigError::Validation)
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("listener.bind_address"));
        assert!(text.contains("router.protocol"));
    }
}
