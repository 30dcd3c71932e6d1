//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Routing headers parsed → RoutingContext
//!     → router.rs (resolve service key, consult whitelist for literal urls)
//!     → cache.rs (copy-on-write host sets with a rotation cursor)
//!     → Scan hosts round-robin, skipping already-attempted ones:
//!         - Available host wins immediately
//!         - Full host kept as fallback
//!         - Problem host triggers a registry refresh
//!     → host.rs (borrow a pooled connection from the winner)
//! ```
//!
//! # Design Decisions
//! - Host sets are immutable snapshots; refreshes install a replacement
//!   while in-flight requests keep the set they started with
//! - Selection never blocks on discovery except on a cache miss
//! - Availability is derived from pool pressure, not health probes
//! - Empty discovery answers are not cached, so registration later
//!   becomes visible on the next request

pub mod cache;
pub mod host;
pub mod router;

pub use cache::{HostCache, HostSet, ServiceKey};
pub use host::{Host, HttpPool};
pub use router::{LoadBalancingRouter, RouterSettings, RoutingContext, SelectError};
