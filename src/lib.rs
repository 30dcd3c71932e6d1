//! Service Gateway Library

pub mod admin;
pub mod config;
pub mod discovery;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod pool;
pub mod resilience;
pub mod security;

pub use config::schema::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
