//! Pooled connection trait and the lease handed out by `borrow`.

use std::fmt;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;

use crate::pool::pool::PoolCore;

/// Contract every pooled connection type must satisfy.
///
/// Implementations are held behind `Arc` by the pool, so all methods take
/// `&self`. `is_open` is consulted on the borrow path while a slot lock is
/// held and must be cheap and non-blocking.
pub trait PooledConnection: Send + Sync + 'static {
    /// Whether the underlying transport is still usable.
    fn is_open(&self) -> bool;

    /// Whether concurrent borrowers may share this connection.
    fn is_multiplex(&self) -> bool;

    /// Local socket address, for diagnostics. `None` when the transport has
    /// no such notion (mock connections, in-process transports).
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Tear down the underlying transport. Must be idempotent.
    fn close(&self);
}

/// Exclusive (or multiplex-shared) claim on one pooled connection.
///
/// Dropping the lease returns the claim to the pool. A lease whose slot has
/// since been vacated or re-occupied restores as a no-op, so late drops can
/// never corrupt a newer tenant's accounting.
#[must_use = "dropping the lease returns the connection to the pool"]
pub struct ConnectionLease<C: PooledConnection> {
    core: Arc<PoolCore<C>>,
    conn: Arc<C>,
    slot: usize,
    generation: u64,
}

impl<C: PooledConnection> ConnectionLease<C> {
    pub(crate) fn new(core: Arc<PoolCore<C>>, conn: Arc<C>, slot: usize, generation: u64) -> Self {
        Self {
            core,
            conn,
            slot,
            generation,
        }
    }

    /// The leased connection.
    pub fn connection(&self) -> &C {
        &self.conn
    }
}

impl<C: PooledConnection> Deref for ConnectionLease<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C: PooledConnection> Drop for ConnectionLease<C> {
    fn drop(&mut self) {
        self.core.release(self.slot, self.generation);
    }
}

impl<C: PooledConnection> fmt::Debug for ConnectionLease<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .field("multiplex", &self.conn.is_multiplex())
            .finish()
    }
}
