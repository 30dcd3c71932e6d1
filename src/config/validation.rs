//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (duplicate service registrations)
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;
use crate::security::HostRule;

/// One semantic problem found in a configuration.
#[derive(Debug, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Check everything serde cannot. Collects every problem instead of
/// stopping at the first so an operator can fix a file in one pass.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {:?}", config.listener.bind_address),
        ));
    }

    if config.forwarding.max_attempts == 0 {
        errors.push(ValidationError::new(
            "forwarding.max_attempts",
            "must be at least 1",
        ));
    }
    if config.forwarding.request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "forwarding.request_timeout_secs",
            "must be greater than zero",
        ));
    }
    if config.forwarding.retry_base_delay_ms > config.forwarding.retry_max_delay_ms {
        errors.push(ValidationError::new(
            "forwarding.retry_base_delay_ms",
            "must not exceed retry_max_delay_ms",
        ));
    }

    if config.pool.max_connections == 0 {
        errors.push(ValidationError::new(
            "pool.max_connections",
            "must be at least 1",
        ));
    }
    if config.pool.max_multiplex_borrowers == 0 {
        errors.push(ValidationError::new(
            "pool.max_multiplex_borrowers",
            "must be at least 1",
        ));
    }
    if config.pool.connect_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "pool.connect_timeout_secs",
            "must be greater than zero",
        ));
    }

    if config.router.protocol != "http" && config.router.protocol != "https" {
        errors.push(ValidationError::new(
            "router.protocol",
            format!("must be \"http\" or \"https\", got {:?}", config.router.protocol),
        ));
    }

    let mut registrations = HashSet::new();
    for (i, service) in config.discovery.services.iter().enumerate() {
        let field = format!("discovery.services[{i}]");
        if service.service_id.is_empty() {
            errors.push(ValidationError::new(&field, "service_id is empty"));
        }
        if service.urls.is_empty() {
            errors.push(ValidationError::new(&field, "has no urls"));
        }
        if !registrations.insert((service.service_id.clone(), service.tag.clone())) {
            errors.push(ValidationError::new(
                &field,
                format!(
                    "duplicate registration for {:?} tag {:?}",
                    service.service_id, service.tag
                ),
            ));
        }
        for url in &service.urls {
            match url.parse::<Url>() {
                Ok(parsed) => {
                    if parsed.host_str().is_none() {
                        errors.push(ValidationError::new(&field, format!("url has no host: {url:?}")));
                    }
                    if parsed.scheme() != "http" && parsed.scheme() != "https" {
                        errors.push(ValidationError::new(
                            &field,
                            format!("unsupported scheme in {url:?}"),
                        ));
                    }
                }
                Err(err) => {
                    errors.push(ValidationError::new(&field, format!("bad url {url:?}: {err}")));
                }
            }
        }
    }

    for (i, entry) in config.whitelist.entries.iter().enumerate() {
        if let Err(err) = HostRule::parse(entry) {
            errors.push(ValidationError::new(
                format!("whitelist.entries[{i}]"),
                err.to_string(),
            ));
        }
    }

    if config.admin.enabled {
        if config.admin.api_key.is_empty() || config.admin.api_key == "CHANGE_ME_IN_PRODUCTION" {
            errors.push(ValidationError::new(
                "admin.api_key",
                "must be set to a real secret when the admin endpoint is enabled",
            ));
        }
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin.bind_address",
                format!("not a socket address: {:?}", config.admin.bind_address),
            ));
        }
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!(
                "not a socket address: {:?}",
                config.observability.metrics_address
            ),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
