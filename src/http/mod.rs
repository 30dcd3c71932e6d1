//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, atomic state)
//!     → context.rs (parse routing headers)
//!     → proxy.rs (select host, borrow connection, forward, fail over)
//!     → response streamed to client, lease released at body EOF
//! ```

pub mod context;
pub mod proxy;
pub mod server;

pub use server::{AppState, HttpServer, StateInner};
