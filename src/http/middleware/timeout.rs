//! Request deadline.
//!
//! The inner chain races a timer. When the timer wins before a response
//! head exists, the inner future is dropped, which cancels the upstream call
//! along with it, and the client gets a structured 504. A head that arrives
//! in time carries the same deadline into its body: a body still streaming
//! when the deadline passes is cut off with an error frame.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};
use tokio::time::Sleep;

use crate::http::error::ProxyError;
use crate::http::X_REQUEST_ID;
use crate::observability::metrics;

pub async fn timeout_middleware(
    State(deadline): State<Duration>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let expires_at = tokio::time::Instant::now() + deadline;
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    match tokio::time::timeout_at(expires_at, next.run(request)).await {
        Ok(response) => {
            response.map(|body| Body::new(DeadlineBody::new(body, expires_at, path)))
        }
        Err(_) => {
            // The logging stage was dropped with the inner chain.
            let status = StatusCode::GATEWAY_TIMEOUT;
            tracing::warn!(
                request_id = %request_id,
                method = %method,
                path = %path,
                status = status.as_u16(),
                latency_ms = start.elapsed().as_millis() as u64,
                timeout_ms = deadline.as_millis() as u64,
                "Request timed out"
            );
            metrics::record_timeout();
            metrics::record_request(method.as_str(), status.as_u16(), start);
            ProxyError::GatewayTimeout.into_response()
        }
    }
}

/// A response body that fails once the request deadline has passed.
struct DeadlineBody {
    inner: Body,
    sleep: Pin<Box<Sleep>>,
    path: String,
    expired: bool,
}

impl DeadlineBody {
    fn new(inner: Body, expires_at: tokio::time::Instant, path: String) -> Self {
        Self {
            inner,
            sleep: Box::pin(tokio::time::sleep_until(expires_at)),
            path,
            expired: false,
        }
    }
}

impl HttpBody for DeadlineBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        if this.expired {
            return Poll::Ready(None);
        }

        if this.sleep.as_mut().poll(cx).is_ready() {
            this.expired = true;
            tracing::warn!(path = %this.path, "Request deadline passed while streaming body");
            metrics::record_timeout();
            return Poll::Ready(Some(Err(axum::Error::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "request deadline exceeded",
            )))));
        }

        Pin::new(&mut this.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.expired || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
