//! What gets cached, and under which key.

use axum::http::{header, HeaderMap, Method, Request, StatusCode};

/// Separator between method and URL in a cache key.
const KEY_SEPARATOR: char = '|';

/// Fingerprint a request: `METHOD|url`, where the URL is the request target
/// exactly as the handler received it (path and query). Headers do not take part.
pub fn cache_key<B>(request: &Request<B>) -> String {
    let method = request.method().as_str();
    let uri = request.uri().to_string();
    let mut key = String::with_capacity(method.len() + 1 + uri.len());
    key.push_str(method);
    key.push(KEY_SEPARATOR);
    key.push_str(&uri);
    key
}

/// Only successful-ish GET responses that upstream did not mark
/// `no-cache` or `private` may be stored.
pub fn is_cacheable(method: &Method, status: StatusCode, headers: &HeaderMap) -> bool {
    if method != Method::GET {
        return false;
    }

    if status.as_u16() >= 400 {
        return false;
    }

    !headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.contains("no-cache") || value.contains("private"))
}
