//! Single-host forwarding.
//!
//! Rewrites each request onto the configured backend and streams the
//! exchange through a pooled hyper client.

use std::net::{IpAddr, SocketAddr};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{
        header::{self, HeaderMap, HeaderName, HeaderValue},
        uri::{PathAndQuery, Uri},
        Request, Version,
    },
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::http::error::ProxyError;
use crate::security::client::X_FORWARDED_FOR;

/// Headers meaningful only for a single hop.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// The innermost handler of the pipeline.
#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    backend: Uri,
}

impl Forwarder {
    /// `backend` must be an absolute `http` URI.
    pub fn new(backend: Uri) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client, backend }
    }

    /// A router sending every path and method to the backend.
    pub fn into_router(self) -> Router {
        Router::new()
            .route("/", any(forward_handler))
            .route("/{*path}", any(forward_handler))
            .with_state(self)
    }

    pub async fn forward(
        &self,
        request: Request<Body>,
        peer: Option<SocketAddr>,
    ) -> Result<Response, ProxyError> {
        let (mut parts, body) = request.into_parts();

        let uri = self.upstream_uri(&parts.uri)?;
        strip_hop_by_hop(&mut parts.headers);
        if let Some(peer) = peer {
            append_forwarded_for(&mut parts.headers, peer.ip());
        }

        parts.uri = uri;
        parts.version = Version::HTTP_11;
        let upstream = Request::from_parts(parts, body);

        tracing::debug!(uri = %upstream.uri(), "Forwarding upstream");

        match self.client.request(upstream).await {
            Ok(response) => Ok(into_downstream(response)),
            Err(e) => {
                tracing::error!(backend = %self.backend, error = %e, "Upstream error");
                Err(ProxyError::BadGateway)
            }
        }
    }

    /// Backend scheme and authority, backend path joined with the request
    /// path, and both query strings.
    fn upstream_uri(&self, incoming: &Uri) -> Result<Uri, ProxyError> {
        let path = join_paths(self.backend.path(), incoming.path());
        let query = match (self.backend.query(), incoming.query()) {
            (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => Some(format!("{a}&{b}")),
            (Some(a), _) if !a.is_empty() => Some(a.to_string()),
            (_, Some(b)) => Some(b.to_string()),
            _ => None,
        };

        let path_and_query = match query {
            Some(q) => format!("{path}?{q}"),
            None => path,
        };

        let mut builder = Uri::builder().path_and_query(
            PathAndQuery::try_from(path_and_query).map_err(|_| ProxyError::BadGateway)?,
        );
        if let Some(scheme) = self.backend.scheme() {
            builder = builder.scheme(scheme.clone());
        }
        if let Some(authority) = self.backend.authority() {
            builder = builder.authority(authority.clone());
        }
        builder.build().map_err(|e| {
            tracing::error!(error = %e, "Failed to build upstream URI");
            ProxyError::BadGateway
        })
    }
}

async fn forward_handler(State(forwarder): State<Forwarder>, request: Request<Body>) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    match forwarder.forward(request, peer).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// Strip hop-by-hop headers from an upstream response; the body streams on.
fn into_downstream(response: hyper::Response<Incoming>) -> Response {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, Body::new(body))
}

/// Join with exactly one slash between the two parts.
fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named by `Connection` are hop-by-hop too.
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, ip: IpAddr) {
    let prior: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let value = if prior.is_empty() {
        ip.to_string()
    } else {
        format!("{}, {}", prior.join(", "), ip)
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
