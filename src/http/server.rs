//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the forwarding handler
//! - Wire up middleware (tracing, timeout)
//! - Build the routing state from configuration
//! - Apply configuration reloads with an atomic swap
//! - Serve with graceful shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{routing::any, Router};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::schema::{ForwardingConfig, GatewayConfig};
use crate::discovery::{static_registry::BadServiceUrl, StaticRegistry};
use crate::http::proxy::gateway_handler;
use crate::load_balancer::{LoadBalancingRouter, RouterSettings};
use crate::pool::{client_tls_config, PoolSettings, TlsSetupError};
use crate::security::{HostWhitelist, RuleParseError};

/// Everything a request needs, rebuilt wholesale on config reload.
pub struct StateInner {
    pub router: LoadBalancingRouter,
    pub forwarding: ForwardingConfig,
    pub multiplex: bool,
    pub propagate_trace: bool,
    /// Budget for borrowing a connection, queue wait included.
    pub connect_budget: Duration,
}

/// Application state injected into handlers.
///
/// Handlers `load_full()` the inner state once per request, so a reload
/// never changes the rules mid-request.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<ArcSwap<StateInner>>,
}

/// Why a configuration could not be turned into routing state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("whitelist: {0}")]
    Whitelist(#[from] RuleParseError),

    #[error("discovery: {0}")]
    Registry(#[from] BadServiceUrl),

    #[error("upstream tls: {0}")]
    Tls(#[from] TlsSetupError),
}

/// Build the routing state for one validated configuration.
pub fn build_state(config: &GatewayConfig) -> Result<StateInner, StateError> {
    let whitelist = HostWhitelist::from_rules(&config.whitelist.entries)?;
    let registry = Arc::new(StaticRegistry::from_config(&config.discovery.services)?);
    let tls = client_tls_config(
        config
            .upstream_tls
            .ca_bundle
            .as_ref()
            .map(std::path::Path::new),
    )?;

    let pool = PoolSettings {
        max_connections: config.pool.max_connections,
        max_multiplex_borrowers: config.pool.max_multiplex_borrowers,
        max_queue_size: config.pool.max_queue_size,
        idle_expiry: Duration::from_secs(config.pool.expire_idle_secs),
        connect_timeout: Duration::from_secs(config.pool.connect_timeout_secs),
        problem_retry: Duration::from_secs(config.pool.problem_retry_secs),
    };
    let connect_budget = pool.connect_timeout;

    let router = LoadBalancingRouter::new(
        registry,
        whitelist,
        RouterSettings {
            protocol: config.router.protocol.clone(),
            pool,
            tls: Some(tls),
        },
    );

    Ok(StateInner {
        router,
        forwarding: config.forwarding.clone(),
        multiplex: config.pool.multiplex,
        propagate_trace: config.observability.propagate_trace,
        connect_budget,
    })
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: &GatewayConfig) -> Result<Self, StateError> {
        let inner = build_state(config)?;
        let state = AppState {
            inner: Arc::new(ArcSwap::from_pointee(inner)),
        };
        let router = Self::build_router(config, state.clone());
        Ok(Self { router, state })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(gateway_handler))
            .route("/", any(gateway_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.forwarding.request_timeout_secs,
            )))
            .layer(TraceLayer::new_for_http())
    }

    /// Shared handle to the routing state, for the admin endpoint.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Run the server until shutdown, applying config updates as they come.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "gateway listening");

        let reload_state = self.state.clone();
        tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                match build_state(&config) {
                    Ok(inner) => {
                        reload_state.inner.store(Arc::new(inner));
                        tracing::info!("configuration applied, host cache rebuilt");
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "config update rejected, keeping current state");
                    }
                }
            }
        });

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("gateway stopped");
        Ok(())
    }
}
