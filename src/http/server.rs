//! HTTP server setup and lifecycle.
//!
//! # Responsibilities
//! - Build the pipeline around a forwarder for the configured backend
//! - Stamp and propagate request IDs
//! - Run the rate-limiter cleanup task and the admin API
//! - Drain in-flight requests on shutdown, then give up after the grace period

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::admin::{self, AdminState};
use crate::cache::ResponseCache;
use crate::config::validation::parse_backend;
use crate::config::ProxyConfig;
use crate::http::{Forwarder, Pipeline};
use crate::lifecycle::Shutdown;
use crate::security::RateLimiter;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid backend URL '{0}'")]
    InvalidBackend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server task failed: {0}")]
    Task(#[from] JoinError),
}

/// HTTP server for the caching proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    cache: Option<Arc<ResponseCache>>,
    limiter: Option<Arc<RateLimiter>>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let backend = parse_backend(&config.backend.url)
            .ok_or_else(|| ServerError::InvalidBackend(config.backend.url.clone()))?;

        let mut pipeline = Pipeline::new(config.timeouts.request());

        let cache = config.cache.enabled.then(|| {
            Arc::new(ResponseCache::new(config.cache.capacity, config.cache.ttl()))
        });
        if let Some(cache) = &cache {
            pipeline = pipeline.with_cache(Arc::clone(cache));
        }

        let limiter = config.rate_limit.enabled.then(|| {
            Arc::new(RateLimiter::new(
                config.rate_limit.requests_per_minute,
                config.rate_limit.burst_size,
            ))
        });
        if let Some(limiter) = &limiter {
            pipeline = pipeline.with_rate_limiter(Arc::clone(limiter));
        }

        let router = pipeline
            .wrap(Forwarder::new(backend).into_router())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

        Ok(Self {
            router,
            config,
            cache,
            limiter,
        })
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.limiter.as_ref()
    }

    /// Serve until `shutdown` fires, then drain.
    ///
    /// In-flight requests get `timeouts.shutdown_grace_secs` to finish. After
    /// that the serve task is aborted and `run` returns anyway.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backend = %self.config.backend.url,
            cache = self.cache.is_some(),
            rate_limit = self.limiter.is_some(),
            "HTTP server starting"
        );

        let mut shutdown_rx = shutdown.subscribe();

        if let Some(limiter) = &self.limiter {
            spawn_cleanup(
                Arc::clone(limiter),
                Duration::from_secs(self.config.rate_limit.cleanup_interval_secs.max(1)),
                Duration::from_secs(self.config.rate_limit.cleanup_max_age_secs),
                shutdown.subscribe(),
            );
        }

        if self.config.admin.enabled {
            let admin_listener = TcpListener::bind(&self.config.admin.bind_address).await?;
            let state = AdminState {
                cache: self.cache.clone(),
                limiter: self.limiter.clone(),
                backend: parse_backend(&self.config.backend.url)
                    .ok_or_else(|| ServerError::InvalidBackend(self.config.backend.url.clone()))?,
                api_key: Arc::from(self.config.admin.api_key.as_str()),
                started_at: Instant::now(),
            };
            let admin_shutdown = shutdown.subscribe();
            tokio::spawn(async move {
                if let Err(e) = admin::serve(admin_listener, state, admin_shutdown).await {
                    tracing::error!(error = %e, "Admin API failed");
                }
            });
        }

        let (drain_tx, drain_rx) = oneshot::channel::<()>();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let mut server: JoinHandle<std::io::Result<()>> = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = drain_rx.await;
                })
                .await
        });

        tokio::select! {
            joined = &mut server => {
                // Server stopped on its own; take the side tasks down with it.
                shutdown.trigger();
                joined??;
                tracing::info!("HTTP server stopped");
                return Ok(());
            }
            _ = shutdown_rx.recv() => {}
        }

        let grace = self.config.timeouts.shutdown_grace();
        tracing::info!(grace_secs = grace.as_secs(), "Shutdown signal received, draining connections");
        let _ = drain_tx.send(());

        match tokio::time::timeout(grace, &mut server).await {
            Ok(joined) => joined??,
            Err(_) => {
                tracing::warn!(
                    grace_secs = grace.as_secs(),
                    "Grace period elapsed with requests in flight, forcing shutdown"
                );
                server.abort();
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Periodically prune idle full buckets until shutdown.
fn spawn_cleanup(
    limiter: Arc<RateLimiter>,
    every: Duration,
    max_age: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    limiter.cleanup(max_age);
                }
                _ = shutdown.recv() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_bad_backend() {
        let mut config = ProxyConfig::default();
        config.backend.url = "ftp://example.com".into();
        assert!(matches!(
            HttpServer::new(config),
            Err(ServerError::InvalidBackend(_))
        ));
    }

    #[tokio::test]
    async fn test_stages_follow_config() {
        let server = HttpServer::new(ProxyConfig::default()).unwrap();
        assert!(server.cache().is_none());
        assert!(server.rate_limiter().is_none());

        let mut config = ProxyConfig::default();
        config.cache.enabled = true;
        config.rate_limit.enabled = true;
        let server = HttpServer::new(config).unwrap();
        assert_eq!(server.cache().unwrap().stats(), (0, 100));
        assert_eq!(server.rate_limiter().unwrap().burst_size(), 20);
    }

    #[tokio::test]
    async fn test_cleanup_task_stops_on_shutdown() {
        let limiter = Arc::new(RateLimiter::new(60, 5));
        let shutdown = Shutdown::new();
        let handle = spawn_cleanup(
            limiter,
            Duration::from_millis(20),
            Duration::from_millis(20),
            shutdown.subscribe(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.trigger();
        let stopped = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(matches!(stopped, Ok(Ok(()))));
    }
}
