//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!     → propagation.rs (request ids, trace context headers)
//!
//! Consumers:
//!     → Log aggregation (stdout, file, remote)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Upstream services (propagated trace headers)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through all subsystems and to upstreams
//! - Metrics are cheap (atomic increments)
//! - Trace propagation is header rewriting only; span export stays out
//!   of the request path

pub mod logging;
pub mod metrics;
pub mod propagation;
