//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Initialize subsystems → Start listeners
//!
//! Shutdown (shutdown.rs):
//!     Ctrl+C received → broadcast to subscribers
//!     → Stop accepting → Drain connections → Exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: stop accept, drain, close
//! - Config reloads flow through the watcher, not signals

pub mod shutdown;

pub use shutdown::Shutdown;
