//! Client identity for rate limiting.
//!
//! Fairness is per identity: the first `X-Forwarded-For` hop when present,
//! else the peer address without its port, else a shared sentinel.
//!
//! `X-Forwarded-For` is client-supplied. This is a trust boundary, not a
//! security control: behind no proxy, a client can pick its own identity.

use std::net::SocketAddr;

use axum::http::HeaderMap;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Identity used when neither a forwarded header nor a peer address exists.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Derive the rate-limit identity for a request.
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty());

    if let Some(xff) = forwarded {
        // Everything before the first comma, untrimmed.
        return match xff.split_once(',') {
            Some((first, _)) => first.to_string(),
            None => xff.to_string(),
        };
    }

    match peer {
        Some(addr) => strip_port(&addr.to_string()).to_string(),
        None => UNKNOWN_CLIENT.to_string(),
    }
}

/// Drop everything from the last `:` on. IPv6 peers keep their brackets
/// (`[::1]:443` becomes `[::1]`).
fn strip_port(addr: &str) -> &str {
    match addr.rfind(':') {
        Some(idx) => &addr[..idx],
        None => addr,
    }
}
