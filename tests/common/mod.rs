//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{any, get},
    Router,
};
use caching_proxy::http::ServerError;
use caching_proxy::{HttpServer, ProxyConfig, Shutdown};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Serve `router` on an ephemeral port as a mock backend.
pub async fn start_backend(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// A backend that counts every request it sees.
///
/// - `/items...` answers 200 with a body naming the path and query
/// - `/private` answers 200 with `Cache-Control: private`
/// - `/missing` answers 404
/// - `/slow` answers after 300ms
/// - `/stall` answers after 10s
/// - `/echo` answers with the request headers as text
pub fn counting_backend() -> (Router, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));

    let router = Router::new()
        .route("/items", any(items))
        .route("/items/{*rest}", any(items))
        .route("/private", get(private))
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                "slow"
            }),
        )
        .route(
            "/stall",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                "stall"
            }),
        )
        .route("/echo", get(echo))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&hits),
            count,
        ));

    (router, hits)
}

async fn count(
    State(hits): State<Arc<AtomicUsize>>,
    request: Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    hits.fetch_add(1, Ordering::SeqCst);
    next.run(request).await
}

async fn items(request: Request) -> String {
    format!("{} {}", request.method(), request.uri())
}

async fn private() -> impl IntoResponse {
    ([(header::CACHE_CONTROL, "private")], "secret")
}

async fn echo(headers: HeaderMap) -> String {
    let mut lines: Vec<String> = headers
        .iter()
        .map(|(name, value)| format!("{}: {}", name, value.to_str().unwrap_or("?")))
        .collect();
    lines.sort();
    lines.join("\n")
}

/// Defaults pointed at `backend`, listening on an ephemeral port.
pub fn config_for(backend: SocketAddr) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.backend.url = format!("http://{backend}");
    config
}

pub struct RunningProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), ServerError>>,
}

impl RunningProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Build and run a proxy for `config` in the background.
pub async fn start_proxy(config: ProxyConfig) -> RunningProxy {
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let server = HttpServer::new(config).unwrap();
    let handle = tokio::spawn(server.run(listener, shutdown.clone()));

    RunningProxy {
        addr,
        shutdown,
        handle,
    }
}

/// An address nothing is listening on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
