//! End-to-end tests driving the gateway over real sockets.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use sidecar_gateway::admin::{setup_admin_router, AdminState};
use sidecar_gateway::config::schema::UpstreamServiceConfig;
use sidecar_gateway::config::GatewayConfig;
use sidecar_gateway::http::HttpServer;
use sidecar_gateway::lifecycle::Shutdown;

mod common;

fn service(id: &str, urls: &[String]) -> UpstreamServiceConfig {
    UpstreamServiceConfig {
        service_id: id.to_string(),
        tag: None,
        urls: urls.to_vec(),
    }
}

/// Default config with fast retry delays so failover tests stay quick.
fn gateway_config(services: Vec<UpstreamServiceConfig>) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.discovery.services = services;
    config.forwarding.retry_base_delay_ms = 10;
    config.forwarding.retry_max_delay_ms = 50;
    config
}

/// Start the gateway on an ephemeral port and return its address.
async fn start_gateway(config: GatewayConfig) -> (SocketAddr, Shutdown) {
    let server = HttpServer::new(&config).expect("gateway state should build");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let (_, config_updates) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    (addr, shutdown)
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

#[tokio::test]
async fn requests_round_robin_across_hosts() {
    let (first_addr, first) = common::start_upstream("first").await;
    let (second_addr, second) = common::start_upstream("second").await;

    let config = gateway_config(vec![service(
        "orders",
        &[format!("http://{first_addr}"), format!("http://{second_addr}")],
    )]);
    let (addr, shutdown) = start_gateway(config).await;

    let client = client();
    for _ in 0..6 {
        let response = client
            .get(format!("http://{addr}/v1/orders"))
            .header("x-service-id", "orders")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        response.text().await.unwrap();
    }

    assert_eq!(first.requests(), 3, "selection should alternate hosts");
    assert_eq!(second.requests(), 3, "selection should alternate hosts");

    shutdown.trigger();
}

#[tokio::test]
async fn failover_skips_a_dead_host() {
    let dead = common::unused_addr().await;
    let (live_addr, live) = common::start_upstream("alive").await;

    let config = gateway_config(vec![service(
        "orders",
        &[format!("http://{dead}"), format!("http://{live_addr}")],
    )]);
    let (addr, shutdown) = start_gateway(config).await;

    let client = client();
    for _ in 0..4 {
        let response = client
            .get(format!("http://{addr}/"))
            .header("x-service-id", "orders")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "alive");
    }

    assert_eq!(live.requests(), 4, "every request should land on the live host");

    shutdown.trigger();
}

#[tokio::test]
async fn literal_url_is_gated_by_the_whitelist() {
    let (upstream_addr, upstream) = common::start_upstream("direct").await;

    // No whitelist entries: literal urls are rejected.
    let config = gateway_config(vec![]);
    let (addr, shutdown) = start_gateway(config).await;

    let client = client();
    let response = client
        .get(format!("http://{addr}/"))
        .header("x-service-url", format!("http://{upstream_addr}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    assert_eq!(upstream.requests(), 0);
    shutdown.trigger();

    // Whitelisted address: the same request goes through.
    let mut config = gateway_config(vec![]);
    config.whitelist.entries = vec!["127.0.0.1".to_string()];
    let (addr, shutdown) = start_gateway(config).await;

    let response = client
        .get(format!("http://{addr}/"))
        .header("x-service-url", format!("http://{upstream_addr}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "direct");
    assert_eq!(upstream.requests(), 1);

    shutdown.trigger();
}

#[tokio::test]
async fn routing_headers_are_stripped_and_trace_headers_injected() {
    let (upstream_addr, _) = common::start_echo_upstream().await;
    let config = gateway_config(vec![service(
        "orders",
        &[format!("http://{upstream_addr}")],
    )]);
    let (addr, shutdown) = start_gateway(config).await;

    let client = client();
    let response = client
        .get(format!("http://{addr}/echo"))
        .header("x-service-id", "orders")
        .header("x-tenant", "acme")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let seen = response.text().await.unwrap().to_lowercase();

    assert!(
        !seen.contains("x-service-id"),
        "routing headers must not leak upstream: {seen}"
    );
    assert!(
        seen.contains("x-tenant: acme"),
        "application headers should pass through: {seen}"
    );
    assert!(
        seen.contains("x-request-id:"),
        "a request id should be forwarded: {seen}"
    );
    assert!(
        seen.contains("traceparent: 00-"),
        "a traceparent should be synthesized: {seen}"
    );

    // A caller-supplied request id is kept, not replaced.
    let response = client
        .get(format!("http://{addr}/echo"))
        .header("x-service-id", "orders")
        .header("x-request-id", "req-12345")
        .send()
        .await
        .unwrap();
    let seen = response.text().await.unwrap().to_lowercase();
    assert!(
        seen.contains("x-request-id: req-12345"),
        "caller request ids are kept: {seen}"
    );

    shutdown.trigger();
}

#[tokio::test]
async fn bad_routing_inputs_map_to_client_errors() {
    let config = gateway_config(vec![]);
    let (addr, shutdown) = start_gateway(config).await;

    let client = client();

    // No routing headers at all.
    let response = client.get(format!("http://{addr}/")).send().await.unwrap();
    assert_eq!(response.status(), 400);

    // Unknown service id.
    let response = client
        .get(format!("http://{addr}/"))
        .header("x-service-id", "ghost")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);

    // Unparseable literal url.
    let response = client
        .get(format!("http://{addr}/"))
        .header("x-service-url", "not a url")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    shutdown.trigger();
}

#[tokio::test]
async fn upstream_connections_are_reused_across_requests() {
    let (upstream_addr, upstream) = common::start_upstream("pooled").await;

    let mut config = gateway_config(vec![service(
        "orders",
        &[format!("http://{upstream_addr}")],
    )]);
    config.pool.max_connections = 1;
    config.pool.max_queue_size = 4;
    let (addr, shutdown) = start_gateway(config).await;

    let client = client();
    for _ in 0..5 {
        let response = client
            .get(format!("http://{addr}/"))
            .header("x-service-id", "orders")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        response.text().await.unwrap();
    }

    assert_eq!(upstream.requests(), 5);
    assert_eq!(
        upstream.connections(),
        1,
        "one pooled connection should serve every request"
    );

    shutdown.trigger();
}

#[tokio::test]
async fn upstream_status_codes_pass_through_unchanged() {
    let (upstream_addr, upstream) = common::start_status_upstream(503).await;
    let config = gateway_config(vec![service(
        "orders",
        &[format!("http://{upstream_addr}")],
    )]);
    let (addr, shutdown) = start_gateway(config).await;

    let client = client();
    let response = client
        .get(format!("http://{addr}/"))
        .header("x-service-id", "orders")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
    assert_eq!(upstream.requests(), 1, "upstream failures are not replayed");

    shutdown.trigger();
}

#[tokio::test]
async fn post_bodies_stream_through_to_the_upstream() {
    let (upstream_addr, upstream) =
        common::serve_upstream(|_head, body| (200, format!("got:{body}"))).await;
    let config = gateway_config(vec![service(
        "orders",
        &[format!("http://{upstream_addr}")],
    )]);
    let (addr, shutdown) = start_gateway(config).await;

    let client = client();
    let response = client
        .post(format!("http://{addr}/submit"))
        .header("x-service-id", "orders")
        .body("payload-123")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "got:payload-123");
    assert_eq!(upstream.requests(), 1);

    shutdown.trigger();
}

#[tokio::test]
async fn oversized_replayable_bodies_are_rejected() {
    let (upstream_addr, upstream) = common::start_upstream("ok").await;
    let mut config = gateway_config(vec![service(
        "orders",
        &[format!("http://{upstream_addr}")],
    )]);
    config.forwarding.max_buffer_bytes = 8;
    let (addr, shutdown) = start_gateway(config).await;

    let client = client();
    let response = client
        .put(format!("http://{addr}/resource"))
        .header("x-service-id", "orders")
        .body("this body is far longer than eight bytes")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 413);
    assert_eq!(upstream.requests(), 0, "an oversized body must never be forwarded");

    shutdown.trigger();
}

#[tokio::test]
async fn config_reload_moves_traffic_without_a_restart() {
    let (old_addr, old_upstream) = common::start_upstream("old").await;
    let (new_addr, new_upstream) = common::start_upstream("new").await;

    let config = gateway_config(vec![service("orders", &[format!("http://{old_addr}")])]);
    let server = HttpServer::new(&config).expect("gateway state should build");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let (config_tx, config_updates) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = client();
    let response = client
        .get(format!("http://{addr}/"))
        .header("x-service-id", "orders")
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "old");

    // Swap the registration for the same service id and wait for the
    // reload task to install it.
    let updated = gateway_config(vec![service("orders", &[format!("http://{new_addr}")])]);
    config_tx.send(updated).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let response = client
        .get(format!("http://{addr}/"))
        .header("x-service-id", "orders")
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "new");

    assert_eq!(old_upstream.requests(), 1);
    assert_eq!(new_upstream.requests(), 1);

    shutdown.trigger();
}

#[tokio::test]
async fn admin_endpoints_require_bearer_auth() {
    let (upstream_addr, _) = common::start_upstream("ok").await;
    let config = gateway_config(vec![service(
        "orders",
        &[format!("http://{upstream_addr}")],
    )]);

    let server = HttpServer::new(&config).expect("gateway state should build");
    let admin_state = AdminState::new(server.state(), "secret-key".to_string());
    let admin_router = setup_admin_router(admin_state);
    let admin_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let admin_addr = admin_listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(admin_listener, admin_router).await;
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let (_, config_updates) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = client();

    // Missing and wrong credentials are rejected.
    let response = client
        .get(format!("http://{admin_addr}/admin/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = client
        .get(format!("http://{admin_addr}/admin/status"))
        .header("authorization", "Bearer wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Authenticated status works; nothing is cached before traffic.
    let response = client
        .get(format!("http://{admin_addr}/admin/status"))
        .header("authorization", "Bearer secret-key")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let status: serde_json::Value = response.json().await.unwrap();
    assert_eq!(status["status"], "operational");
    assert_eq!(status["cached_services"], 0);

    // Drive one request through the gateway so a host set is cached.
    let response = client
        .get(format!("http://{addr}/"))
        .header("x-service-id", "orders")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.text().await.unwrap();

    // Hosts listing shows the cached upstream and its pool stats.
    let response = client
        .get(format!("http://{admin_addr}/admin/hosts"))
        .header("authorization", "Bearer secret-key")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let hosts: serde_json::Value = response.json().await.unwrap();
    let listed = hosts.as_array().expect("hosts endpoint returns a list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["service"], "orders");

    // Close the pools and confirm the idle connection was retired.
    let response = client
        .post(format!("http://{admin_addr}/admin/pools/close"))
        .header("authorization", "Bearer secret-key")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let closed: serde_json::Value = response.json().await.unwrap();
    assert_eq!(closed["closed"], 1);

    shutdown.trigger();
}
