//! Composition of the pipeline stages around a forwarder.
//!
//! Outermost to innermost:
//!
//! ```text
//! panic isolation → timeout → logging → rate limit → cache → forwarder
//! ```
//!
//! The cache and rate-limit stages are present only when a store or limiter
//! was supplied. Both are injected, never global, so every test can build an
//! isolated pipeline.

use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, Router};
use tower_http::catch_panic::CatchPanicLayer;

use crate::cache::ResponseCache;
use crate::http::middleware::{
    cache_middleware, logging_middleware, panic_response, rate_limit_middleware,
    timeout_middleware,
};
use crate::security::RateLimiter;

#[derive(Clone)]
pub struct Pipeline {
    request_timeout: Duration,
    cache: Option<Arc<ResponseCache>>,
    limiter: Option<Arc<RateLimiter>>,
}

impl Pipeline {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            cache: None,
            limiter: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.limiter.as_ref()
    }

    /// Wrap `forwarder` in every configured stage.
    ///
    /// `Router::layer` makes each call the new outermost layer, so stages are
    /// applied innermost first.
    pub fn wrap(&self, forwarder: Router) -> Router {
        let mut router = forwarder;

        if let Some(cache) = &self.cache {
            router = router.layer(middleware::from_fn_with_state(
                Arc::clone(cache),
                cache_middleware,
            ));
        }

        if let Some(limiter) = &self.limiter {
            router = router.layer(middleware::from_fn_with_state(
                Arc::clone(limiter),
                rate_limit_middleware,
            ));
        }

        router
            .layer(middleware::from_fn(logging_middleware))
            .layer(middleware::from_fn_with_state(
                self.request_timeout,
                timeout_middleware,
            ))
            .layer(CatchPanicLayer::custom(panic_response))
    }
}
