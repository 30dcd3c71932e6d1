//! Shared mock upstreams for integration and load testing.
//!
//! The mocks speak just enough HTTP/1.1 to serve the gateway: they parse the
//! request head, skip a content-length body, and keep the connection open so
//! pooled connections actually get reused across requests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Counters tracking how a mock upstream has been exercised.
#[derive(Clone, Default)]
pub struct UpstreamStats {
    connections: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl UpstreamStats {
    /// Total connections accepted since the upstream started.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Highest number of connections that were open at the same time.
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    /// Total requests answered.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

/// Start a keep-alive mock upstream that answers every request with 200 and
/// a fixed body.
#[allow(dead_code)]
pub async fn start_upstream(body: &'static str) -> (SocketAddr, UpstreamStats) {
    serve_upstream(move |_head, _body| (200, body.to_string())).await
}

/// Start a mock upstream that answers every request with a fixed status.
#[allow(dead_code)]
pub async fn start_status_upstream(status: u16) -> (SocketAddr, UpstreamStats) {
    serve_upstream(move |_head, _body| (status, "mock upstream".to_string())).await
}

/// Start a mock upstream that echoes the received request head (request line
/// plus headers) back as the response body.
#[allow(dead_code)]
pub async fn start_echo_upstream() -> (SocketAddr, UpstreamStats) {
    serve_upstream(|head, _body| (200, head.to_string())).await
}

/// Wait until the upstream has accepted at least `n` connections.
///
/// A dial completes in the kernel backlog before the mock's accept loop
/// runs, so connection counts can trail a successful borrow. Assertions
/// on them go through here instead of reading the counter directly.
#[allow(dead_code)]
pub async fn wait_for_connections(stats: &UpstreamStats, n: usize) {
    for _ in 0..100 {
        if stats.connections() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "upstream accepted {} connections, expected at least {n}",
        stats.connections()
    );
}

/// Reserve an address nothing listens on. Connections to it are refused.
#[allow(dead_code)]
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Run a mock upstream on an ephemeral port. The responder sees the raw
/// request head and body and picks the status and response body.
#[allow(dead_code)]
pub async fn serve_upstream<F>(respond: F) -> (SocketAddr, UpstreamStats)
where
    F: Fn(&str, &str) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stats = UpstreamStats::default();
    let respond = Arc::new(respond);

    let accept_stats = stats.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    accept_stats.connections.fetch_add(1, Ordering::SeqCst);
                    let live = accept_stats.live.fetch_add(1, Ordering::SeqCst) + 1;
                    accept_stats.max_live.fetch_max(live, Ordering::SeqCst);
                    let stats = accept_stats.clone();
                    let respond = respond.clone();
                    tokio::spawn(async move {
                        let _ = handle_connection(socket, &stats, respond.as_ref()).await;
                        stats.live.fetch_sub(1, Ordering::SeqCst);
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, stats)
}

/// Serve requests on one connection until the peer hangs up.
async fn handle_connection<F>(
    mut socket: TcpStream,
    stats: &UpstreamStats,
    respond: &F,
) -> std::io::Result<()>
where
    F: Fn(&str, &str) -> (u16, String),
{
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let head_end = loop {
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos;
            }
            let n = socket.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            buf.extend_from_slice(&chunk[..n]);
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
        let total = head_end + 4 + content_length(&head);
        while buf.len() < total {
            let n = socket.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        let body = String::from_utf8_lossy(&buf[head_end + 4..total]).to_string();
        buf.drain(..total);

        stats.requests.fetch_add(1, Ordering::SeqCst);
        let (status, response_body) = respond(&head, &body);
        let status_text = match status {
            200 => "200 OK",
            404 => "404 Not Found",
            429 => "429 Too Many Requests",
            500 => "500 Internal Server Error",
            502 => "502 Bad Gateway",
            503 => "503 Service Unavailable",
            _ => "200 OK",
        };
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\n\r\n{}",
            status_text,
            response_body.len(),
            response_body
        );
        socket.write_all(response.as_bytes()).await?;
    }
}

fn content_length(head: &str) -> usize {
    for line in head.lines() {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                if let Ok(len) = value.trim().parse() {
                    return len;
                }
            }
        }
    }
    0
}
