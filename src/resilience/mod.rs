//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → failure on attempt N
//!     → backoff.rs (jittered delay before attempt N+1)
//!     → host selection skips hosts already attempted
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retries only when the request body can be replayed
//! - Jittered backoff prevents thundering herd
//! - Failure tracking lives in the connection pool (problem window),
//!   not in a separate circuit breaker

pub mod backoff;

pub use backoff::RetryPolicy;
