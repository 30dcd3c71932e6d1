//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Request forwarding and retry behaviour.
    pub forwarding: ForwardingConfig,

    /// Per-upstream connection pool limits.
    pub pool: PoolConfig,

    /// Host selection settings.
    pub router: RouterConfig,

    /// Statically registered upstream services.
    pub discovery: DiscoveryConfig,

    /// IP whitelist for literal service urls.
    pub whitelist: WhitelistConfig,

    /// TLS settings for upstream connections.
    pub upstream_tls: UpstreamTlsConfig,

    /// Admin endpoint settings.
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Request forwarding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Total time budget for one proxied request in seconds.
    pub request_timeout_secs: u64,

    /// Upstream attempts per request, including the first.
    pub max_attempts: u32,

    /// Base delay for backoff between attempts in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Maximum delay for backoff between attempts in milliseconds.
    pub retry_max_delay_ms: u64,

    /// Largest request body buffered for replay on retry, in bytes.
    /// Bodies over this size are forwarded once without retry.
    pub max_buffer_bytes: usize,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            max_attempts: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2000,
            max_buffer_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Connection pool configuration, applied to every upstream host.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum open connections per host.
    pub max_connections: usize,

    /// Concurrent borrowers allowed on one multiplexed connection.
    pub max_multiplex_borrowers: usize,

    /// Borrowers allowed to wait for a slot. Zero fails fast.
    pub max_queue_size: usize,

    /// Idle seconds after which a connection is replaced.
    pub expire_idle_secs: u64,

    /// Connect and handshake budget in seconds.
    pub connect_timeout_secs: u64,

    /// Seconds a connect failure keeps a host marked problematic.
    pub problem_retry_secs: u64,

    /// Prefer multiplexed (HTTP/2) connections to upstreams.
    pub multiplex: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            max_multiplex_borrowers: 4,
            max_queue_size: 0,
            expire_idle_secs: 30,
            connect_timeout_secs: 5,
            problem_retry_secs: 30,
            multiplex: false,
        }
    }
}

/// Host selection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Scheme requested from discovery ("http" or "https").
    pub protocol: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
        }
    }
}

/// Static service registry contents.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Service registrations available for lookup.
    pub services: Vec<UpstreamServiceConfig>,
}

/// One service registration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamServiceConfig {
    /// Service identifier requests route by.
    pub service_id: String,

    /// Environment tag this registration serves (e.g., "staging").
    #[serde(default)]
    pub tag: Option<String>,

    /// Upstream urls for this registration.
    pub urls: Vec<String>,
}

/// Whitelist configuration for literal service urls.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct WhitelistConfig {
    /// Allowed addresses: exact IPs or CIDR prefixes.
    pub entries: Vec<String>,
}

/// TLS settings for upstream (outbound) connections.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct UpstreamTlsConfig {
    /// Extra PEM CA bundle trusted alongside the webpki roots.
    pub ca_bundle: Option<String>,
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin endpoint.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin endpoint bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Forward incoming trace headers and synthesize missing ones.
    pub propagate_trace: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
            propagate_trace: true,
        }
    }
}
