//! Admin API: cache and rate-limiter introspection on a separate listener.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    http::Uri,
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::cache::ResponseCache;
use crate::security::RateLimiter;

#[derive(Clone)]
pub struct AdminState {
    pub cache: Option<Arc<ResponseCache>>,
    pub limiter: Option<Arc<RateLimiter>>,
    pub backend: Uri,
    pub api_key: Arc<str>,
    pub started_at: Instant,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    let protected = Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/cache", get(get_cache))
        .route("/admin/cache/clear", post(clear_cache))
        .route("/admin/rate-limit", get(get_rate_limit))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}

/// Serve the admin API until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use std::time::Duration;
    use tower::ServiceExt;

    fn state() -> AdminState {
        let cache = Arc::new(ResponseCache::new(8, Duration::from_secs(60)));
        cache.set(
            "GET|/a",
            crate::cache::CachedResponse::new(
                StatusCode::OK,
                Default::default(),
                bytes::Bytes::from_static(b"a"),
            ),
        );
        AdminState {
            cache: Some(cache),
            limiter: Some(Arc::new(RateLimiter::new(60, 10))),
            backend: "http://127.0.0.1:5000".parse().unwrap(),
            api_key: Arc::from("secret"),
            started_at: Instant::now(),
        }
    }

    fn authed(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, "Bearer secret")
            .body(Body::empty())
            .unwrap()
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = setup_admin_router(state());
        let res = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_requires_key() {
        let app = setup_admin_router(state());
        let res = app
            .clone()
            .oneshot(Request::get("/admin/cache").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app
            .oneshot(
                Request::get("/admin/cache")
                    .header(header::AUTHORIZATION, "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_cache_stats_and_clear() {
        let state = state();
        let app = setup_admin_router(state.clone());

        let res = app.clone().oneshot(authed("GET", "/admin/cache")).await.unwrap();
        let body = json(res).await;
        assert_eq!(body["enabled"], true);
        assert_eq!(body["size"], 1);
        assert_eq!(body["capacity"], 8);

        let res = app.oneshot(authed("POST", "/admin/cache/clear")).await.unwrap();
        let body = json(res).await;
        assert_eq!(body["cleared"], 1);
        assert_eq!(state.cache.unwrap().size(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_stats() {
        let state = state();
        state.limiter.as_ref().unwrap().allow("10.0.0.1");
        let app = setup_admin_router(state);

        let res = app.oneshot(authed("GET", "/admin/rate-limit")).await.unwrap();
        let body = json(res).await;
        assert_eq!(body["buckets"], 1);
        assert_eq!(body["burst_size"], 10);
        assert_eq!(body["requests_per_minute"], 60);
    }

    #[tokio::test]
    async fn test_status_reports_stages() {
        let mut state = state();
        state.limiter = None;
        let app = setup_admin_router(state);

        let res = app.oneshot(authed("GET", "/admin/status")).await.unwrap();
        let body = json(res).await;
        assert_eq!(body["cache_enabled"], true);
        assert_eq!(body["rate_limit_enabled"], false);
        assert_eq!(body["backend"], "http://127.0.0.1:5000/");
    }
}
