//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (RPS, latency, errors, pool pressure)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-upstream and aggregate metrics
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, upstream
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_request_retries_total` (counter): attempts beyond the first
//! - `gateway_host_selection_total` (counter): selection outcomes
//! - `gateway_pool_connections_open` (gauge): open connections per upstream
//! - `gateway_pool_*_total` (counters): open/close/dial-failure/reject events
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Labels for method, upstream, status code, rejection reason
//! - The exporter failing to bind logs an error but never takes the
//!   gateway down with it

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint and register metric metadata.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe_metrics();
            tracing::info!(address = %addr, "metrics exporter listening");
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to start metrics exporter");
        }
    }
}

fn describe_metrics() {
    describe_counter!(
        "gateway_requests_total",
        "Proxied requests by method, status and upstream"
    );
    describe_histogram!(
        "gateway_request_duration_seconds",
        Unit::Seconds,
        "Time from request arrival to upstream response headers"
    );
    describe_counter!(
        "gateway_request_retries_total",
        "Upstream attempts beyond the first"
    );
    describe_counter!("gateway_host_selection_total", "Host selection outcomes");
    describe_gauge!(
        "gateway_pool_connections_open",
        "Open pooled connections per upstream"
    );
    describe_counter!(
        "gateway_pool_connections_opened_total",
        "Pooled connections dialed"
    );
    describe_counter!(
        "gateway_pool_connections_closed_total",
        "Pooled connections dropped, by reason"
    );
    describe_counter!(
        "gateway_pool_connect_failures_total",
        "Failed upstream dials"
    );
    describe_counter!(
        "gateway_pool_borrow_rejected_total",
        "Borrow attempts rejected, by reason"
    );
    describe_counter!(
        "gateway_pool_force_closed_total",
        "Connections closed by admin request"
    );
}

pub fn record_request(method: &str, status: u16, upstream: &str, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "upstream" => upstream.to_string()
    )
    .increment(1);
    histogram!(
        "gateway_request_duration_seconds",
        "method" => method.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_retry(upstream: &str) {
    counter!("gateway_request_retries_total", "upstream" => upstream.to_string()).increment(1);
}

pub fn host_selection(outcome: &'static str) {
    counter!("gateway_host_selection_total", "outcome" => outcome).increment(1);
}

pub fn pool_connection_opened(uri: &str) {
    counter!("gateway_pool_connections_opened_total", "upstream" => uri.to_string()).increment(1);
    gauge!("gateway_pool_connections_open", "upstream" => uri.to_string()).increment(1.0);
}

pub fn pool_connection_closed(uri: &str, reason: &'static str) {
    counter!(
        "gateway_pool_connections_closed_total",
        "upstream" => uri.to_string(),
        "reason" => reason
    )
    .increment(1);
    gauge!("gateway_pool_connections_open", "upstream" => uri.to_string()).decrement(1.0);
}

pub fn pool_connect_failure(uri: &str) {
    counter!("gateway_pool_connect_failures_total", "upstream" => uri.to_string()).increment(1);
}

pub fn pool_borrow_rejected(uri: &str, reason: &'static str) {
    counter!(
        "gateway_pool_borrow_rejected_total",
        "upstream" => uri.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn pool_force_closed(uri: &str, closed: usize) {
    counter!("gateway_pool_force_closed_total", "upstream" => uri.to_string())
        .increment(closed as u64);
    gauge!("gateway_pool_connections_open", "upstream" => uri.to_string())
        .decrement(closed as f64);
}
