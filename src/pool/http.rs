//! hyper-backed pooled connections.
//!
//! Each pooled connection owns one `SendRequest` handle plus the spawned
//! driver task that pumps the transport. The driver flips a shared flag when
//! the transport dies, which is what [`PooledConnection::is_open`] reports
//! back to the pool without any I/O.

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use hyper::body::Incoming;
use hyper::client::conn::{http1, http2};
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::AbortHandle;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use url::Url;

use crate::pool::connection::PooledConnection;
use crate::pool::maker::{ConnectionMaker, MakeError};

enum HttpSender {
    /// HTTP/1.1 allows one request at a time, so the handle sits behind an
    /// async mutex even though the pool already hands it out exclusively.
    Http1(tokio::sync::Mutex<http1::SendRequest<Body>>),
    /// HTTP/2 handles are cheaply cloneable and stream-multiplexed.
    Http2(http2::SendRequest<Body>),
}

/// One established upstream connection.
pub struct HttpConnection {
    sender: HttpSender,
    open: Arc<AtomicBool>,
    driver: AbortHandle,
    peer: String,
    local: Option<SocketAddr>,
}

impl HttpConnection {
    /// Issue a request on this connection. Any transport-level failure marks
    /// the connection closed so the pool replaces it instead of reusing it.
    pub async fn send_request(
        &self,
        request: Request<Body>,
    ) -> Result<Response<Incoming>, hyper::Error> {
        let result = match &self.sender {
            HttpSender::Http1(sender) => {
                let mut sender = sender.lock().await;
                match sender.ready().await {
                    Ok(()) => sender.send_request(request).await,
                    Err(err) => Err(err),
                }
            }
            HttpSender::Http2(sender) => {
                let mut sender = sender.clone();
                match sender.ready().await {
                    Ok(()) => sender.send_request(request).await,
                    Err(err) => Err(err),
                }
            }
        };
        if result.is_err() {
            self.open.store(false, Ordering::Release);
            tracing::debug!(peer = %self.peer, "marking upstream connection closed after send error");
        }
        result
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl fmt::Debug for HttpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let protocol = match &self.sender {
            HttpSender::Http1(_) => "http/1.1",
            HttpSender::Http2(_) => "h2",
        };
        f.debug_struct("HttpConnection")
            .field("peer", &self.peer)
            .field("protocol", &protocol)
            .field("open", &self.is_open())
            .finish()
    }
}

impl PooledConnection for HttpConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn is_multiplex(&self) -> bool {
        matches!(self.sender, HttpSender::Http2(_))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.driver.abort();
    }
}

fn spawn_driver<F>(transport: F, peer: String) -> (Arc<AtomicBool>, AbortHandle)
where
    F: std::future::Future<Output = Result<(), hyper::Error>> + Send + 'static,
{
    let open = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&open);
    let driver = tokio::spawn(async move {
        if let Err(err) = transport.await {
            tracing::debug!(peer = %peer, error = %err, "upstream connection terminated");
        }
        flag.store(false, Ordering::Release);
    })
    .abort_handle();
    (open, driver)
}

async fn handshake_http1<I>(
    io: TokioIo<I>,
    peer: String,
    local: Option<SocketAddr>,
) -> Result<HttpConnection, MakeError>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, transport) = http1::handshake(io).await.map_err(|err| MakeError::Handshake {
        protocol: "http/1.1",
        message: err.to_string(),
    })?;
    let (open, driver) = spawn_driver(transport, peer.clone());
    Ok(HttpConnection {
        sender: HttpSender::Http1(tokio::sync::Mutex::new(sender)),
        open,
        driver,
        peer,
        local,
    })
}

async fn handshake_http2<I>(
    io: TokioIo<I>,
    peer: String,
    local: Option<SocketAddr>,
) -> Result<HttpConnection, MakeError>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, transport) = http2::handshake(TokioExecutor::new(), io)
        .await
        .map_err(|err| MakeError::Handshake {
            protocol: "http/2",
            message: err.to_string(),
        })?;
    let (open, driver) = spawn_driver(transport, peer.clone());
    Ok(HttpConnection {
        sender: HttpSender::Http2(sender),
        open,
        driver,
        peer,
        local,
    })
}

/// Dials one upstream URL and performs the protocol handshake.
///
/// For `https` targets the negotiated ALPN protocol decides between HTTP/2
/// and HTTP/1.1; for plaintext targets the `multiplex` preference selects
/// prior-knowledge HTTP/2.
pub struct HttpConnectionMaker {
    url: Url,
    tls: Option<Arc<ClientConfig>>,
}

impl HttpConnectionMaker {
    pub fn new(url: Url, tls: Option<Arc<ClientConfig>>) -> Self {
        Self { url, tls }
    }
}

#[async_trait]
impl ConnectionMaker for HttpConnectionMaker {
    type Connection = HttpConnection;

    async fn make(&self, multiplex: bool) -> Result<HttpConnection, MakeError> {
        let host = self.url.host_str().ok_or_else(|| MakeError::Handshake {
            protocol: "tcp",
            message: format!("upstream url {} has no host", self.url),
        })?;
        let port = self.url.port_or_known_default().unwrap_or(80);
        let peer = format!("{host}:{port}");

        let stream = TcpStream::connect((host, port)).await?;
        let _ = stream.set_nodelay(true);
        let local = stream.local_addr().ok();

        if self.url.scheme() == "https" {
            let Some(tls) = &self.tls else {
                return Err(MakeError::Tls(format!(
                    "no client tls configuration for https upstream {peer}"
                )));
            };
            let server_name = ServerName::try_from(host.to_string())
                .map_err(|err| MakeError::Tls(err.to_string()))?;
            let connector = TlsConnector::from(Arc::clone(tls));
            let stream = connector
                .connect(server_name, stream)
                .await
                .map_err(|err| MakeError::Tls(err.to_string()))?;
            let negotiated_h2 = stream.get_ref().1.alpn_protocol() == Some(b"h2".as_slice());
            if negotiated_h2 {
                handshake_http2(TokioIo::new(stream), peer, local).await
            } else {
                handshake_http1(TokioIo::new(stream), peer, local).await
            }
        } else if multiplex {
            handshake_http2(TokioIo::new(stream), peer, local).await
        } else {
            handshake_http1(TokioIo::new(stream), peer, local).await
        }
    }
}

#[derive(Debug, Error)]
pub enum TlsSetupError {
    #[error("failed to read ca bundle {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse ca bundle {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ca bundle {path} contained no usable certificates")]
    Empty { path: String },
}

/// Build the client TLS configuration used for every https upstream.
///
/// Trust is anchored on the bundled webpki roots, optionally extended with a
/// PEM bundle for private CAs. ALPN offers h2 and http/1.1 and the server's
/// pick decides how the resulting connection multiplexes.
pub fn client_tls_config(ca_bundle: Option<&Path>) -> Result<Arc<ClientConfig>, TlsSetupError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = ca_bundle {
        let display = path.display().to_string();
        let pem = std::fs::read(path).map_err(|source| TlsSetupError::Read {
            path: display.clone(),
            source,
        })?;
        let mut added = 0usize;
        let mut reader = pem.as_slice();
        for cert in rustls_pemfile::certs(&mut reader) {
            let cert = cert.map_err(|source| TlsSetupError::Parse {
                path: display.clone(),
                source,
            })?;
            if roots.add(cert).is_ok() {
                added += 1;
            }
        }
        if added == 0 {
            return Err(TlsSetupError::Empty { path: display });
        }
        tracing::info!(path = %path.display(), added, "loaded additional upstream ca certificates");
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}
