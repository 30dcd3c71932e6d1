//! Service discovery subsystem.
//!
//! # Data Flow
//! ```text
//! selectHost cache miss → registry.resolve(protocol, service_id, tag)
//!     → static_registry.rs (lookup in config-provided snapshot)
//!     → Vec<Url> → load balancer builds one pooled Host per url
//! ```
//!
//! # Design Decisions
//! - Resolution is synchronous; implementations serve from a local snapshot
//! - An empty result means "nothing registered" and is not an error
//! - The registry trait stays tiny so a consul/etcd client can slot in

pub mod static_registry;

pub use static_registry::StaticRegistry;

use thiserror::Error;
use url::Url;

/// Failure talking to a discovery backend. Registry lookups that simply
/// find nothing return an empty list instead.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("service discovery backend failure: {0}")]
    Backend(String),
}

/// Maps a service id (plus optional environment tag) to the URLs currently
/// serving it, filtered to the requested protocol.
pub trait ServiceRegistry: Send + Sync {
    fn resolve(
        &self,
        protocol: &str,
        service_id: &str,
        tag: Option<&str>,
    ) -> Result<Vec<Url>, DiscoveryError>;
}
