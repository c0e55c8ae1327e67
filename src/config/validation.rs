//! Configuration validation.
//!
//! Serde handles syntax; this module checks values. Every problem is
//! reported, not just the first one.

use std::net::SocketAddr;

use axum::http::Uri;
use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: '{value}' is not a valid socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("backend.url: '{0}' must be an absolute http:// URL")]
    InvalidBackend(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("admin.api_key must not be empty when the admin API is enabled")]
    MissingAdminKey,
}

/// Validate a fully layered configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);

    if parse_backend(&config.backend.url).is_none() {
        errors.push(ValidationError::InvalidBackend(config.backend.url.clone()));
    }

    if config.cache.enabled {
        if config.cache.capacity == 0 {
            errors.push(ValidationError::Zero("cache.capacity"));
        }
        if config.cache.ttl_secs == 0 {
            errors.push(ValidationError::Zero("cache.ttl_secs"));
        }
    }

    if config.rate_limit.enabled {
        if config.rate_limit.requests_per_minute == 0 {
            errors.push(ValidationError::Zero("rate_limit.requests_per_minute"));
        }
        if config.rate_limit.burst_size == 0 {
            errors.push(ValidationError::Zero("rate_limit.burst_size"));
        }
        if config.rate_limit.cleanup_interval_secs == 0 {
            errors.push(ValidationError::Zero("rate_limit.cleanup_interval_secs"));
        }
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.request_secs"));
    }

    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::MissingAdminKey);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Parse a backend URL, accepting only absolute `http` URIs with an authority.
pub fn parse_backend(url: &str) -> Option<Uri> {
    let uri: Uri = url.parse().ok()?;
    match (uri.scheme_str(), uri.authority()) {
        (Some("http"), Some(_)) => Some(uri),
        _ => None,
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
