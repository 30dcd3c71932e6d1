//! Trace context propagation.
//!
//! # Responsibilities
//! - Extract request ids and trace context from incoming requests
//! - Propagate both to upstream requests
//!
//! # Design Decisions
//! - Supports W3C Trace Context headers
//! - A request without a traceparent gets a synthesized one so upstream
//!   spans still correlate

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use uuid::Uuid;

pub const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const TRACEPARENT: HeaderName = HeaderName::from_static("traceparent");

/// Take the caller's request id, or mint one.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Stamp outbound headers with the request id and a traceparent.
///
/// An existing traceparent is left alone; the upstream sees the same
/// trace the caller started.
pub fn inject(headers: &mut HeaderMap, request_id: &str) {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(REQUEST_ID, value);
    }
    if !headers.contains_key(TRACEPARENT) {
        if let Ok(value) = HeaderValue::from_str(&synthesize_traceparent()) {
            headers.insert(TRACEPARENT, value);
        }
    }
}

/// Build a W3C traceparent: version 00, fresh ids, sampled flag set.
fn synthesize_traceparent() -> String {
    let trace_id = Uuid::new_v4().simple().to_string();
    let span_id = &Uuid::new_v4().simple().to_string()[..16];
    format!("00-{trace_id}-{span_id}-01")
}
