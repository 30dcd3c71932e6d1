//! Admin endpoint: bearer-authenticated operational introspection.

pub mod auth;
pub mod handlers;

use std::time::Instant;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::{close_pools, get_hosts, get_status};
use crate::http::server::AppState;

/// State for the admin endpoint: the gateway state it reports on, plus
/// its own credentials.
#[derive(Clone)]
pub struct AdminState {
    pub gateway: AppState,
    pub api_key: String,
    pub started: Instant,
}

impl AdminState {
    pub fn new(gateway: AppState, api_key: String) -> Self {
        Self {
            gateway,
            api_key,
            started: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/hosts", get(get_hosts))
        .route("/admin/pools/close", post(close_pools))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}
