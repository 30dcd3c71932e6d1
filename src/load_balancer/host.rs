//! One upstream host: a URL plus its connection pool.

use std::sync::Arc;
use std::time::Duration;

use tokio_rustls::rustls::ClientConfig;
use url::Url;

use crate::pool::{
    Availability, ConnectionLease, ConnectionPool, HttpConnection, HttpConnectionMaker,
    PoolError, PoolSettings,
};

/// Pool specialisation used for real upstream traffic.
pub type HttpPool = ConnectionPool<HttpConnectionMaker>;

/// An upstream instance eligible for selection.
///
/// Hosts are immutable once built: changing pool limits or TLS material
/// means installing a replacement host set, never mutating a live host.
pub struct Host {
    service_id: String,
    url: Url,
    url_text: String,
    pool: HttpPool,
}

impl Host {
    pub fn new(
        service_id: impl Into<String>,
        url: Url,
        tls: Option<Arc<ClientConfig>>,
        settings: PoolSettings,
    ) -> Self {
        let url_text = url.to_string();
        let maker = HttpConnectionMaker::new(url.clone(), tls);
        let pool = ConnectionPool::new(url_text.clone(), maker, settings);
        Self {
            service_id: service_id.into(),
            url,
            url_text,
            pool,
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Canonical text form of the url, used to match against the attempted
    /// set during failover.
    pub fn url_text(&self) -> &str {
        &self.url_text
    }

    /// `host:port` for the outbound Host header / :authority.
    pub fn authority(&self) -> String {
        match (self.url.host_str(), self.url.port_or_known_default()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => self.url_text.clone(),
        }
    }

    /// Current pressure, derived from pool state on every call.
    pub fn availability(&self) -> Availability {
        self.pool.available()
    }

    pub fn pool(&self) -> &HttpPool {
        &self.pool
    }

    pub async fn borrow_connection(
        &self,
        timeout: Duration,
        multiplex: bool,
    ) -> Result<ConnectionLease<HttpConnection>, PoolError> {
        self.pool.borrow(timeout, multiplex).await
    }

    /// Record an out-of-band failure (for example a request that died after
    /// borrow) so selection treats this host as problematic for a while.
    pub fn note_failure(&self) {
        self.pool.note_connect_failure();
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("service_id", &self.service_id)
            .field("url", &self.url_text)
            .finish()
    }
}
