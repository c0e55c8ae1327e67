use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub backend: String,
    pub cache_enabled: bool,
    pub rate_limit_enabled: bool,
}

#[derive(Serialize)]
pub struct CacheStatus {
    pub enabled: bool,
    pub size: usize,
    pub capacity: usize,
    pub ttl_secs: u64,
}

#[derive(Serialize)]
pub struct CacheCleared {
    pub enabled: bool,
    pub cleared: usize,
}

#[derive(Serialize)]
pub struct RateLimitStatus {
    pub enabled: bool,
    pub buckets: usize,
    pub total_tokens: f64,
    pub requests_per_minute: u32,
    pub burst_size: u32,
}

pub async fn health() -> &'static str {
    "OK"
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        backend: state.backend.to_string(),
        cache_enabled: state.cache.is_some(),
        rate_limit_enabled: state.limiter.is_some(),
    })
}

pub async fn get_cache(State(state): State<AdminState>) -> Json<CacheStatus> {
    let status = match &state.cache {
        Some(cache) => {
            let (size, capacity) = cache.stats();
            CacheStatus {
                enabled: true,
                size,
                capacity,
                ttl_secs: cache.ttl().as_secs(),
            }
        }
        None => CacheStatus {
            enabled: false,
            size: 0,
            capacity: 0,
            ttl_secs: 0,
        },
    };
    Json(status)
}

pub async fn clear_cache(State(state): State<AdminState>) -> Json<CacheCleared> {
    let cleared = state.cache.as_ref().map(|cache| cache.clear());
    if let Some(cleared) = cleared {
        tracing::info!(cleared, "Cache cleared via admin API");
    }
    Json(CacheCleared {
        enabled: cleared.is_some(),
        cleared: cleared.unwrap_or(0),
    })
}

pub async fn get_rate_limit(State(state): State<AdminState>) -> Json<RateLimitStatus> {
    let status = match &state.limiter {
        Some(limiter) => {
            let (buckets, total_tokens) = limiter.stats();
            RateLimitStatus {
                enabled: true,
                buckets,
                total_tokens,
                requests_per_minute: limiter.requests_per_minute(),
                burst_size: limiter.burst_size(),
            }
        }
        None => RateLimitStatus {
            enabled: false,
            buckets: 0,
            total_tokens: 0.0,
            requests_per_minute: 0,
            burst_size: 0,
        },
    };
    Json(status)
}
