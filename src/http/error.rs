//! Structured error responses.
//!
//! Every response the proxy generates on its own behalf carries a JSON body
//! with a stable `error` code clients can branch on.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProxyError {
    #[error("An unexpected error occurred")]
    Internal,

    #[error("Request timed out")]
    GatewayTimeout,

    #[error("Too many requests")]
    RateLimited,

    #[error("Upstream request failed")]
    BadGateway,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::BadGateway => StatusCode::BAD_GATEWAY,
        }
    }

    /// Machine-readable code for the `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::Internal => "internal_server_error",
            ProxyError::GatewayTimeout => "gateway_timeout",
            ProxyError::RateLimited => "rate_limit_exceeded",
            ProxyError::BadGateway => "bad_gateway",
        }
    }

    pub fn body(&self) -> String {
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
        };
        // Two plain string fields cannot fail to serialize.
        serde_json::to_string(&body).unwrap_or_default()
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            self.body(),
        )
            .into_response()
    }
}
