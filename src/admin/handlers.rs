use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::pool::PoolStats;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub cached_services: usize,
}

#[derive(Serialize)]
pub struct HostStatus {
    pub service: String,
    pub url: String,
    pub availability: &'static str,
    pub stats: PoolStats,
}

#[derive(Serialize)]
pub struct PoolsClosed {
    pub closed: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let inner = state.gateway.inner.load_full();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started.elapsed().as_secs(),
        cached_services: inner.router.cache_snapshot().len(),
    })
}

/// Every cached host with its availability and pool counters, the raw
/// material for dashboards and capacity checks.
pub async fn get_hosts(State(state): State<AdminState>) -> Json<Vec<HostStatus>> {
    let inner = state.gateway.inner.load_full();
    let mut statuses = Vec::new();

    for (key, set) in inner.router.cache_snapshot() {
        for host in set.hosts() {
            statuses.push(HostStatus {
                service: key.to_string(),
                url: host.url_text().to_string(),
                availability: host.availability().as_str(),
                stats: host.pool().stats(),
            });
        }
    }

    Json(statuses)
}

/// Force-close every pooled upstream connection. Borrowed connections
/// are untouched; they retire when their leases come back.
pub async fn close_pools(State(state): State<AdminState>) -> Json<PoolsClosed> {
    let inner = state.gateway.inner.load_full();
    let closed = inner.router.close_all_pools();
    tracing::info!(closed, "admin force-closed pooled connections");
    Json(PoolsClosed { closed })
}
