//! Routing header extraction.
//!
//! Callers address upstreams with three request headers: a service id
//! (plus optional environment tag) resolved through discovery, or a
//! literal service url that bypasses it. The headers are gateway-internal
//! and are stripped before the request leaves for the upstream.

use axum::http::{HeaderMap, HeaderName};

use crate::load_balancer::RoutingContext;

pub const SERVICE_ID: HeaderName = HeaderName::from_static("x-service-id");
pub const ENV_TAG: HeaderName = HeaderName::from_static("x-env-tag");
pub const SERVICE_URL: HeaderName = HeaderName::from_static("x-service-url");

/// Read the routing headers into a [`RoutingContext`].
///
/// Blank values count as absent so a header set to "" cannot shadow a
/// usable one.
pub fn from_headers(headers: &HeaderMap) -> RoutingContext {
    RoutingContext {
        service_id: header_value(headers, &SERVICE_ID),
        env_tag: header_value(headers, &ENV_TAG),
        service_url: header_value(headers, &SERVICE_URL),
    }
}

/// Remove the routing headers before forwarding upstream.
pub fn strip_routing_headers(headers: &mut HeaderMap) {
    headers.remove(SERVICE_ID);
    headers.remove(ENV_TAG);
    headers.remove(SERVICE_URL);
}

fn header_value(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn headers_map_to_context_fields() {
        let mut headers = HeaderMap::new();
        headers.insert(SERVICE_ID, HeaderValue::from_static("orders"));
        headers.insert(ENV_TAG, HeaderValue::from_static("staging"));

        let ctx = from_headers(&headers);
        assert_eq!(ctx.service_id.as_deref(), Some("orders"));
        assert_eq!(ctx.env_tag.as_deref(), Some("staging"));
        assert_eq!(ctx.service_url, None);
    }

    #[test]
    fn blank_headers_count_as_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(SERVICE_ID, HeaderValue::from_static(""));
        assert_eq!(from_headers(&headers), RoutingContext::default());
    }

    #[test]
    fn stripping_removes_only_routing_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(SERVICE_ID, HeaderValue::from_static("orders"));
        headers.insert(SERVICE_URL, HeaderValue::from_static("http://10.0.0.1:80"));
        headers.insert("accept", HeaderValue::from_static("application/json"));

        strip_routing_headers(&mut headers);
        assert!(headers.get(SERVICE_ID).is_none());
        assert!(headers.get(SERVICE_URL).is_none());
        assert_eq!(headers.get("accept").unwrap(), "application/json");
    }
}
