//! Per-upstream connection pooling subsystem.
//!
//! # Data Flow
//! ```text
//! Host selected → pool.borrow(timeout, multiplex)
//!     → pool.rs (scan slots: reuse open connection or reserve empty slot)
//!     → maker.rs (dial + handshake when a slot was reserved)
//!     → connection.rs (lease handed to caller, restored on drop)
//!     → http.rs (hyper SendRequest plumbing behind the pool traits)
//! ```
//!
//! # Design Decisions
//! - Fixed slot array sized at construction; no dynamic growth
//! - Per-slot locking so borrowers never serialize on a pool-wide lock
//! - Generation counters make restores from stale leases harmless
//! - Connection creation happens outside any lock, against a reserved slot
//! - Multiplex-capable connections are shared up to a soft borrower cap

pub mod connection;
pub mod http;
pub mod maker;
#[allow(clippy::module_inception)]
pub mod pool;

pub use connection::{ConnectionLease, PooledConnection};
pub use http::{client_tls_config, HttpConnection, HttpConnectionMaker, TlsSetupError};
pub use maker::{ConnectionMaker, MakeError};
pub use pool::{Availability, ConnectionPool, PoolError, PoolSettings, PoolStats};
