//! Connection factory seam.
//!
//! The pool never dials anything itself; it asks a [`ConnectionMaker`] for a
//! fresh connection whenever a reserved slot needs filling. Keeping the
//! factory behind a trait lets tests drive the pool with scripted
//! connections and keeps protocol details out of the slot bookkeeping.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::pool::connection::PooledConnection;

/// Why establishing a new upstream connection failed.
#[derive(Debug, Error)]
pub enum MakeError {
    #[error("tcp connect failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls handshake failed: {0}")]
    Tls(String),

    #[error("{protocol} handshake failed: {message}")]
    Handshake {
        protocol: &'static str,
        message: String,
    },

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
}

/// Factory for one upstream URI.
///
/// `multiplex` is a preference, not a guarantee: the factory may return a
/// non-multiplexed connection (for example when ALPN settles on HTTP/1.1)
/// and the pool will treat it according to what the connection reports.
#[async_trait]
pub trait ConnectionMaker: Send + Sync + 'static {
    type Connection: PooledConnection;

    async fn make(&self, multiplex: bool) -> Result<Self::Connection, MakeError>;
}
