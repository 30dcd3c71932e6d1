//! Request forwarding with failover.
//!
//! # Data Flow
//! ```text
//! Request arrives
//!     → routing headers parsed, request id taken or minted
//!     → idempotent bodies buffered for replay
//!     → attempt loop:
//!         select host (skipping ones already tried)
//!         → borrow pooled connection
//!         → rewrite uri + headers, send
//!         → failure: jittered backoff, next attempt
//!     → response streamed back, lease held until body EOF
//! ```
//!
//! # Design Decisions
//! - Only replayable requests fail over; streamed bodies get one attempt
//! - The connection lease rides inside the response body so an HTTP/1
//!   connection cannot be reused while the client is still reading
//! - Send failures retire the connection but do not mark the host
//!   problematic; only dial failures do

use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::uri::Uri;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper::body::{Body as HttpBody, Frame, Incoming, SizeHint};

use crate::http::context;
use crate::http::server::AppState;
use crate::load_balancer::SelectError;
use crate::observability::{metrics, propagation};
use crate::pool::{ConnectionLease, HttpConnection, PoolError, PooledConnection};
use crate::resilience::RetryPolicy;

/// Main gateway handler. Resolves a host, forwards the request, and
/// fails over across hosts while the body can still be replayed.
pub async fn gateway_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Response {
    let start_time = Instant::now();
    let inner = state.inner.load_full();

    let request_id = propagation::request_id(request.headers());
    let ctx = context::from_headers(request.headers());
    let method = request.method().clone();
    let method_str = method.to_string();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path_and_query,
        "forwarding request"
    );

    if ctx.service_id.is_none() && ctx.service_url.is_none() {
        metrics::record_request(&method_str, 400, "none", start_time);
        return (
            StatusCode::BAD_REQUEST,
            "request names no service id or service url",
        )
            .into_response();
    }

    // 1. Buffer the body when the request may be replayed
    let (parts, body) = request.into_parts();
    let (body_bytes, mut streaming_body) = if method.is_idempotent() {
        match axum::body::to_bytes(body, inner.forwarding.max_buffer_bytes).await {
            Ok(bytes) => (Some(bytes), None),
            Err(err) => {
                tracing::warn!(request_id = %request_id, error = %err, "request body exceeds replay buffer");
                metrics::record_request(&method_str, 413, "none", start_time);
                return (
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "request body too large to buffer",
                )
                    .into_response();
            }
        }
    } else {
        (None, Some(body))
    };

    let max_attempts = if body_bytes.is_some() {
        inner.forwarding.max_attempts.max(1)
    } else {
        1
    };

    // 2. Attempt loop
    let retry = RetryPolicy::from_millis(
        inner.forwarding.retry_base_delay_ms,
        inner.forwarding.retry_max_delay_ms,
    );
    let mut attempted: Vec<String> = Vec::new();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        // Select a host not yet tried for this request
        let host = match inner.router.select_host(&ctx, &attempted) {
            Ok(host) => host,
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = retry.delay_for(attempt);
                tracing::info!(
                    request_id = %request_id,
                    attempt,
                    delay = ?delay,
                    error = %err,
                    "host selection failed, retrying"
                );
                metrics::record_retry("none");
                tokio::time::sleep(delay).await;
                continue;
            }
            Err(err) => {
                let (status, message) = selection_response(&err);
                tracing::warn!(
                    request_id = %request_id,
                    error = %err,
                    status = %status,
                    "host selection failed"
                );
                metrics::record_request(&method_str, status.as_u16(), "none", start_time);
                return (status, message).into_response();
            }
        };
        attempted.push(host.url_text().to_string());

        // Borrow a pooled connection from the selected host
        let lease = match host
            .borrow_connection(inner.connect_budget, inner.multiplex)
            .await
        {
            Ok(lease) => lease,
            Err(err) => {
                tracing::warn!(
                    request_id = %request_id,
                    upstream = %host.url_text(),
                    attempt,
                    error = %err,
                    "connection borrow failed"
                );
                if attempt < max_attempts {
                    metrics::record_retry(host.url_text());
                    tokio::time::sleep(retry.delay_for(attempt)).await;
                    continue;
                }
                let (status, message) = borrow_response(&err);
                metrics::record_request(&method_str, status.as_u16(), host.url_text(), start_time);
                return (status, message).into_response();
            }
        };

        // Build the outbound request for this attempt
        let outbound_body = if let Some(bytes) = &body_bytes {
            Body::from(bytes.clone())
        } else if let Some(streamed) = streaming_body.take() {
            streamed
        } else {
            metrics::record_request(&method_str, 502, host.url_text(), start_time);
            return (StatusCode::BAD_GATEWAY, "request body already consumed").into_response();
        };

        let authority = host.authority();
        let uri = match outbound_uri(
            lease.is_multiplex(),
            host.url().scheme(),
            &authority,
            &path_and_query,
        ) {
            Ok(uri) => uri,
            Err(err) => {
                tracing::error!(
                    request_id = %request_id,
                    upstream = %host.url_text(),
                    error = %err,
                    "failed to build upstream uri"
                );
                metrics::record_request(&method_str, 500, host.url_text(), start_time);
                return (StatusCode::INTERNAL_SERVER_ERROR, "failed to build upstream uri")
                    .into_response();
            }
        };

        let mut outbound = Request::new(outbound_body);
        *outbound.method_mut() = method.clone();
        *outbound.uri_mut() = uri;
        *outbound.headers_mut() = parts.headers.clone();

        let headers = outbound.headers_mut();
        context::strip_routing_headers(headers);
        if inner.propagate_trace {
            propagation::inject(headers, &request_id);
        }
        if lease.is_multiplex() {
            // HTTP/2 carries the authority in the uri
            headers.remove(header::HOST);
        } else if let Ok(value) = HeaderValue::from_str(&authority) {
            headers.insert(header::HOST, value);
        }

        // 3. Forward
        match lease.send_request(outbound).await {
            Ok(response) => {
                let status = response.status();
                metrics::record_request(&method_str, status.as_u16(), host.url_text(), start_time);
                tracing::debug!(
                    request_id = %request_id,
                    upstream = %host.url_text(),
                    status = %status,
                    attempt,
                    "upstream responded"
                );
                let (parts, incoming) = response.into_parts();
                let body = Body::new(LeasedBody {
                    inner: incoming,
                    _lease: lease,
                });
                return Response::from_parts(parts, body).into_response();
            }
            Err(err) => {
                tracing::error!(
                    request_id = %request_id,
                    upstream = %host.url_text(),
                    attempt,
                    error = %err,
                    "upstream request failed"
                );
                if attempt < max_attempts {
                    metrics::record_retry(host.url_text());
                    tokio::time::sleep(retry.delay_for(attempt)).await;
                    continue;
                }
                metrics::record_request(&method_str, 502, host.url_text(), start_time);
                return (StatusCode::BAD_GATEWAY, "upstream request failed").into_response();
            }
        }
    }
}

/// Response body that keeps the connection lease alive until the client
/// has consumed the upstream body. Returning an HTTP/1 connection to the
/// pool before EOF would let another borrower interleave on the socket.
struct LeasedBody {
    inner: Incoming,
    _lease: ConnectionLease<HttpConnection>,
}

impl HttpBody for LeasedBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// HTTP/1 upstreams get origin-form uris plus a host header; HTTP/2
/// upstreams get the absolute form hyper turns into `:authority`.
fn outbound_uri(
    multiplex: bool,
    scheme: &str,
    authority: &str,
    path_and_query: &str,
) -> Result<Uri, axum::http::Error> {
    if multiplex {
        Uri::builder()
            .scheme(scheme)
            .authority(authority)
            .path_and_query(path_and_query)
            .build()
    } else {
        Uri::builder().path_and_query(path_and_query).build()
    }
}

fn selection_response(err: &SelectError) -> (StatusCode, &'static str) {
    match err {
        SelectError::MissingServiceId => (
            StatusCode::BAD_REQUEST,
            "request names no service id or service url",
        ),
        SelectError::InvalidServiceUrl { .. } => {
            (StatusCode::BAD_REQUEST, "invalid service url")
        }
        SelectError::NotWhitelisted(_) => {
            (StatusCode::FORBIDDEN, "service url is not whitelisted")
        }
        SelectError::NoneRegistered(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "no hosts registered for service",
        ),
        SelectError::NoneAvailable(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "no upstream host available")
        }
        SelectError::Discovery(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "service discovery failed")
        }
    }
}

fn borrow_response(err: &PoolError) -> (StatusCode, &'static str) {
    match err {
        PoolError::AtCapacity { .. }
        | PoolError::QueueFull { .. }
        | PoolError::BorrowTimeout { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            "upstream connection pool is saturated",
        ),
        PoolError::ConnectTimeout { .. } | PoolError::Connect { .. } => {
            (StatusCode::BAD_GATEWAY, "failed to connect to upstream")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http1_uri_is_origin_form() {
        let uri = outbound_uri(false, "http", "10.0.0.1:8080", "/orders?limit=5").unwrap();
        assert_eq!(uri.to_string(), "/orders?limit=5");
        assert!(uri.authority().is_none());
    }

    #[test]
    fn http2_uri_is_absolute() {
        let uri = outbound_uri(true, "http", "10.0.0.1:8080", "/orders?limit=5").unwrap();
        assert_eq!(uri.scheme_str(), Some("http"));
        assert_eq!(uri.authority().map(|a| a.as_str()), Some("10.0.0.1:8080"));
        assert_eq!(uri.path_and_query().map(|pq| pq.as_str()), Some("/orders?limit=5"));
    }

    #[test]
    fn selection_failures_map_to_client_statuses() {
        assert_eq!(
            selection_response(&SelectError::MissingServiceId).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            selection_response(&SelectError::NotWhitelisted("http://10.0.0.1/".into())).0,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            selection_response(&SelectError::NoneRegistered("orders".into())).0,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn saturation_and_dial_failures_map_differently() {
        let saturated = PoolError::AtCapacity {
            uri: "http://10.0.0.1/".into(),
        };
        assert_eq!(borrow_response(&saturated).0, StatusCode::SERVICE_UNAVAILABLE);

        let refused = PoolError::ConnectTimeout {
            uri: "http://10.0.0.1/".into(),
        };
        assert_eq!(borrow_response(&refused).0, StatusCode::BAD_GATEWAY);
    }
}
