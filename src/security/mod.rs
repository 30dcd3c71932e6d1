//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Literal-URL routing request:
//!     → whitelist.rs (match host against vetted IP rules)
//!     → allowed: build pooled host for the url
//!     → denied: request rejected, no upstream dialed
//! ```
//!
//! # Design Decisions
//! - Fail closed: DNS names, unconfigured whitelists, and parse gaps reject
//! - Rules are parsed once at config load, never on the request path
//! - No trust in client input

pub mod whitelist;

pub use whitelist::{HostRule, HostWhitelist, RuleParseError};
