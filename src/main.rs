//! Service Gateway
//!
//! A sidecar gateway that routes by service identity instead of URL: callers
//! name a service (or a whitelisted literal url), the gateway resolves it
//! through discovery, balances across the registered hosts, and forwards
//! over per-host connection pools.
//!
//! # Architecture Overview
//!
//! ```text
//!                          ┌───────────────────────────────────────────────────┐
//!                          │                  SERVICE GATEWAY                   │
//!                          │                                                    │
//!     Client Request       │  ┌─────────┐    ┌──────────────┐    ┌──────────┐  │
//!     ─────────────────────┼─▶│  http   │───▶│load_balancer │───▶│discovery │  │
//!      x-service-id: ...   │  │ server  │    │ select host  │    │ registry │  │
//!                          │  └─────────┘    └──────┬───────┘    └──────────┘  │
//!                          │                        │                          │
//!                          │                        ▼                          │
//!     Client Response      │  ┌─────────┐    ┌──────────────┐                  │
//!     ◀────────────────────┼──│ leased  │◀───│  connection  │◀─────────────────┼──── Upstream
//!                          │  │  body   │    │     pool     │                  │      Service
//!                          │  └─────────┘    └──────────────┘                  │
//!                          │                                                    │
//!                          │  ┌──────────────────────────────────────────────┐ │
//!                          │  │            Cross-Cutting Concerns            │ │
//!                          │  │  ┌────────┐ ┌──────────┐ ┌────────────────┐  │ │
//!                          │  │  │ config │ │ observa- │ │security (url   │  │ │
//!                          │  │  │+reload │ │ bility   │ │   whitelist)   │  │ │
//!                          │  │  └────────┘ └──────────┘ └────────────────┘  │ │
//!                          │  │  ┌─────────────────┐  ┌───────────────────┐  │ │
//!                          │  │  │   resilience    │  │     lifecycle     │  │ │
//!                          │  │  │ backoff/retry   │  │     shutdown      │  │ │
//!                          │  │  └─────────────────┘  └───────────────────┘  │ │
//!                          │  └──────────────────────────────────────────────┘ │
//!                          └───────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use sidecar_gateway::admin::{setup_admin_router, AdminState};
use sidecar_gateway::config::{load_config, ConfigWatcher, GatewayConfig};
use sidecar_gateway::http::HttpServer;
use sidecar_gateway::lifecycle::Shutdown;
use sidecar_gateway::observability::logging;

#[derive(Parser)]
#[command(name = "sidecar-gateway", version)]
#[command(about = "Service gateway with discovery-based routing and pooled upstream connections")]
struct Args {
    /// Path to the gateway configuration file (TOML). Defaults apply
    /// when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    if args.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    logging::init(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        services = config.discovery.services.len(),
        "gateway starting"
    );

    // Metrics endpoint
    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            sidecar_gateway::observability::metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "failed to parse metrics address"
            );
        }
    }

    let server = HttpServer::new(&config)?;
    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    // Hot reload only makes sense when the config came from a file.
    let (config_updates, _watcher) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            (updates, Some(handle))
        }
        None => {
            let (_tx, updates) = mpsc::unbounded_channel();
            (updates, None)
        }
    };

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signals();

    // Admin endpoint on its own listener
    if config.admin.enabled {
        let admin_state = AdminState::new(server.state(), config.admin.api_key.clone());
        let admin_router = setup_admin_router(admin_state);
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        let mut admin_shutdown = shutdown.subscribe();

        tracing::info!(address = %config.admin.bind_address, "admin endpoint listening");
        tokio::spawn(async move {
            let result = axum::serve(admin_listener, admin_router)
                .with_graceful_shutdown(async move {
                    let _ = admin_shutdown.recv().await;
                })
                .await;
            if let Err(err) = result {
                tracing::error!(error = %err, "admin endpoint failed");
            }
        });
    }

    server
        .run(listener, config_updates, shutdown.subscribe())
        .await?;

    tracing::info!("shutdown complete");
    Ok(())
}
