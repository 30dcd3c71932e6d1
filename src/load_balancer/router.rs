//! Host selection: round-robin over cached host sets with
//! availability-aware fallback.

use std::sync::Arc;

use thiserror::Error;
use tokio_rustls::rustls::ClientConfig;
use url::Url;

use crate::discovery::{DiscoveryError, ServiceRegistry};
use crate::load_balancer::cache::{HostCache, HostSet, ServiceKey};
use crate::load_balancer::host::Host;
use crate::observability::metrics;
use crate::pool::{Availability, PoolSettings};
use crate::security::HostWhitelist;

/// What the caller asked to reach, after header parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingContext {
    pub service_id: Option<String>,
    pub env_tag: Option<String>,
    pub service_url: Option<String>,
}

impl RoutingContext {
    pub fn for_service(service_id: impl Into<String>) -> Self {
        Self {
            service_id: Some(service_id.into()),
            ..Self::default()
        }
    }

    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            service_url: Some(url.into()),
            ..Self::default()
        }
    }
}

/// Why no host could be produced for a request.
#[derive(Debug, Error)]
pub enum SelectError {
    #[error("request names no service id or service url")]
    MissingServiceId,

    #[error("invalid service url {url:?}: {source}")]
    InvalidServiceUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("service url {0} is not whitelisted")]
    NotWhitelisted(String),

    #[error("no hosts registered for {0}")]
    NoneRegistered(String),

    #[error("no host currently available for {0}")]
    NoneAvailable(String),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

impl SelectError {
    /// Whether waiting and selecting again may yield a host.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SelectError::NoneAvailable(_) | SelectError::Discovery(_)
        )
    }
}

/// Settings shared by every host the router builds.
#[derive(Clone)]
pub struct RouterSettings {
    /// Scheme requested from discovery ("http" or "https").
    pub protocol: String,
    pub pool: PoolSettings,
    pub tls: Option<Arc<ClientConfig>>,
}

enum Target {
    Url { url: Url, text: String },
    Service { id: String, tag: Option<String> },
}

/// Maps routing contexts to pooled hosts.
///
/// The router is immutable after construction; configuration reloads build
/// a replacement router and swap it in at the server layer, which also
/// discards the host cache so new pool limits take effect.
pub struct LoadBalancingRouter {
    registry: Arc<dyn ServiceRegistry>,
    whitelist: HostWhitelist,
    settings: RouterSettings,
    cache: HostCache,
}

impl LoadBalancingRouter {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        whitelist: HostWhitelist,
        settings: RouterSettings,
    ) -> Self {
        Self {
            registry,
            whitelist,
            settings,
            cache: HostCache::new(),
        }
    }

    /// Pick an upstream host for this request.
    ///
    /// Hosts named in `attempted` are skipped, which is how failover avoids
    /// re-selecting an upstream that already failed this request. Scanning
    /// starts at the rotation cursor and wraps once: the first `Available`
    /// host wins, a `Full` host is remembered as fallback, and if only
    /// problematic hosts remain the set is refreshed and the error reports
    /// a retryable condition.
    pub fn select_host(
        &self,
        ctx: &RoutingContext,
        attempted: &[String],
    ) -> Result<Arc<Host>, SelectError> {
        let (key, target) = self.target_for(ctx)?;

        let set = match self.cache.get(&key) {
            Some(set) => set,
            None => self.build_entry(&key, &target)?,
        };
        if set.is_empty() {
            metrics::host_selection("none_registered");
            return Err(SelectError::NoneRegistered(key.to_string()));
        }

        let hosts = set.hosts();
        let start = set.next_start();
        let mut full_fallback: Option<&Arc<Host>> = None;
        let mut saw_problem = false;

        for offset in 0..hosts.len() {
            let host = &hosts[(start + offset) % hosts.len()];
            if attempted.iter().any(|tried| tried == host.url_text()) {
                continue;
            }
            match host.availability() {
                Availability::Available => {
                    metrics::host_selection("available");
                    tracing::debug!(
                        service = %key,
                        upstream = %host.url_text(),
                        "selected available host"
                    );
                    return Ok(Arc::clone(host));
                }
                Availability::Full => {
                    if full_fallback.is_none() {
                        full_fallback = Some(host);
                    }
                }
                Availability::Problem | Availability::FullQueue => {
                    saw_problem = true;
                }
            }
        }

        if let Some(host) = full_fallback {
            metrics::host_selection("full_fallback");
            tracing::debug!(
                service = %key,
                upstream = %host.url_text(),
                "all hosts saturated, selecting full host"
            );
            return Ok(Arc::clone(host));
        }

        if saw_problem {
            // Problematic hosts poison the cached set; rebuild it so the
            // caller's retry sees fresh pools and registrations.
            self.refresh(&key, &target);
        }
        metrics::host_selection("none_available");
        Err(SelectError::NoneAvailable(key.to_string()))
    }

    /// Force-close every pooled connection behind every cached host.
    pub fn close_all_pools(&self) -> usize {
        let mut closed = 0;
        for (_, set) in self.cache.snapshot() {
            for host in set.hosts() {
                closed += host.pool().close_all();
            }
        }
        closed
    }

    pub fn cache_snapshot(&self) -> Vec<(ServiceKey, Arc<HostSet>)> {
        self.cache.snapshot()
    }

    fn target_for(&self, ctx: &RoutingContext) -> Result<(ServiceKey, Target), SelectError> {
        if let Some(raw) = &ctx.service_url {
            let url = raw
                .parse::<Url>()
                .map_err(|source| SelectError::InvalidServiceUrl {
                    url: raw.clone(),
                    source,
                })?;
            let text = url.to_string();
            return Ok((ServiceKey::for_url(&text), Target::Url { url, text }));
        }
        let Some(id) = &ctx.service_id else {
            return Err(SelectError::MissingServiceId);
        };
        Ok((
            ServiceKey::for_service(id, ctx.env_tag.as_deref()),
            Target::Service {
                id: id.clone(),
                tag: ctx.env_tag.clone(),
            },
        ))
    }

    fn build_entry(&self, key: &ServiceKey, target: &Target) -> Result<Arc<HostSet>, SelectError> {
        let hosts = self.build_hosts(key, target)?;
        if hosts.is_empty() {
            // Nothing registered. Deliberately not cached so the next
            // request re-resolves instead of pinning the empty answer.
            metrics::host_selection("none_registered");
            return Err(SelectError::NoneRegistered(key.to_string()));
        }
        Ok(self.cache.install(key.clone(), hosts))
    }

    fn refresh(&self, key: &ServiceKey, target: &Target) {
        match self.build_hosts(key, target) {
            Ok(hosts) => {
                let count = hosts.len();
                self.cache.install(key.clone(), hosts);
                tracing::info!(service = %key, hosts = count, "refreshed host set");
            }
            Err(err) => {
                tracing::warn!(service = %key, error = %err, "host set refresh failed");
            }
        }
    }

    fn build_hosts(&self, key: &ServiceKey, target: &Target) -> Result<Vec<Arc<Host>>, SelectError> {
        match target {
            Target::Url { url, text } => {
                if !self.whitelist.is_host_allowed(url) {
                    metrics::host_selection("rejected_whitelist");
                    tracing::warn!(url = %text, "literal service url rejected by whitelist");
                    return Err(SelectError::NotWhitelisted(text.clone()));
                }
                Ok(vec![Arc::new(Host::new(
                    key.as_str(),
                    url.clone(),
                    self.settings.tls.clone(),
                    self.settings.pool.clone(),
                ))])
            }
            Target::Service { id, tag } => {
                let urls = self
                    .registry
                    .resolve(&self.settings.protocol, id, tag.as_deref())?;
                let hosts = urls
                    .into_iter()
                    .filter_map(|url| {
                        if url.host_str().is_none() {
                            tracing::warn!(service = %id, url = %url, "discovered url has no host, skipping");
                            return None;
                        }
                        Some(Arc::new(Host::new(
                            id.clone(),
                            url,
                            self.settings.tls.clone(),
                            self.settings.pool.clone(),
                        )))
                    })
                    .collect();
                Ok(hosts)
            }
        }
    }
}
