//! Panic isolation.
//!
//! Installed as the outermost stage through tower-http's `CatchPanicLayer`.
//! A fault anywhere inside the chain becomes a structured 500 and never
//! takes down the connection task.

use std::any::Any;

use axum::response::{IntoResponse, Response};

use crate::http::error::ProxyError;
use crate::observability::metrics;

/// Panic handler for `CatchPanicLayer::custom`.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "non-string panic payload"
    };

    tracing::error!(panic = %detail, "Panic recovered in request pipeline");
    metrics::record_panic();
    ProxyError::Internal.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_string_and_str_payloads() {
        let response = panic_response(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = panic_response(Box::new(String::from("boom")));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = panic_response(Box::new(42u8));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
