//! Per-client admission control.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::http::error::ProxyError;
use crate::observability::metrics;
use crate::security::{client_identity, RateLimitDecision, RateLimiter};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Admit or reject by client identity. Admitted responses carry the same
/// bucket snapshot in `X-RateLimit-*` headers; rejections add `Retry-After`.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = client_identity(request.headers(), peer);

    let decision = limiter.check(&identity);

    if !decision.allowed {
        tracing::warn!(client = %identity, "Rate limit exceeded");
        metrics::record_rate_limited();

        let mut response = ProxyError::RateLimited.into_response();
        let headers = response.headers_mut();
        stamp_headers(headers, &decision);
        headers.insert(header::RETRY_AFTER, HeaderValue::from(decision.retry_after_secs));
        return response;
    }

    let mut response = next.run(request).await;
    stamp_headers(response.headers_mut(), &decision);
    response
}

fn stamp_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    if let Ok(reset) = HeaderValue::from_str(&format_reset(decision.reset_at)) {
        headers.insert(X_RATELIMIT_RESET, reset);
    }
}

/// RFC3339, UTC, whole seconds.
pub fn format_reset(at: SystemTime) -> String {
    DateTime::<Utc>::from(at).to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_format_reset() {
        let at = UNIX_EPOCH + Duration::from_millis(1_700_000_000_900);
        assert_eq!(format_reset(at), "2023-11-14T22:13:20Z");
    }
}
