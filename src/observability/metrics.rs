//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_cache_lookups_total` (counter): by outcome (hit, miss, bypass)
//! - `proxy_cache_entries` (gauge): live cache entries
//! - `proxy_rate_limited_total` (counter): rejected requests
//! - `proxy_rate_limit_buckets` (gauge): tracked client buckets
//! - `proxy_timeouts_total` (counter): requests cut off by the deadline
//! - `proxy_panics_total` (counter): faults contained by the panic stage

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP scrape listener.
/// Must be called from inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_cache_lookup(outcome: &'static str) {
    counter!("proxy_cache_lookups_total", "outcome" => outcome).increment(1);
}

pub fn record_cache_size(entries: usize) {
    gauge!("proxy_cache_entries").set(entries as f64);
}

pub fn record_rate_limited() {
    counter!("proxy_rate_limited_total").increment(1);
}

pub fn record_rate_limit_buckets(buckets: usize) {
    gauge!("proxy_rate_limit_buckets").set(buckets as f64);
}

pub fn record_timeout() {
    counter!("proxy_timeouts_total").increment(1);
}

pub fn record_panic() {
    counter!("proxy_panics_total").increment(1);
}
