//! Response caching stage.
//!
//! Hits are answered from the store. On a miss the upstream response is
//! streamed to the client untouched while a copy of the body accumulates;
//! the copy is stored only once the body finishes cleanly.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use bytes::{Bytes, BytesMut};
use http_body::{Body as HttpBody, Frame, SizeHint};

use crate::cache::{cache_key, is_cacheable, CachedResponse, ResponseCache};
use crate::observability::metrics;

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
const HIT: HeaderValue = HeaderValue::from_static("HIT");
const MISS: HeaderValue = HeaderValue::from_static("MISS");
const BYPASS: HeaderValue = HeaderValue::from_static("BYPASS");

pub async fn cache_middleware(
    State(cache): State<Arc<ResponseCache>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = cache_key(&request);

    if let Some(hit) = cache.get(&key) {
        tracing::debug!(key = %key, "Cache hit");
        metrics::record_cache_lookup("hit");
        return replay(&hit);
    }

    let method = request.method().clone();
    let response = next.run(request).await;
    let (mut parts, body) = response.into_parts();

    if is_cacheable(&method, parts.status, &parts.headers) {
        metrics::record_cache_lookup("miss");
        let capture = Capture {
            cache,
            key,
            status: parts.status,
            headers: parts.headers.clone(),
            buffer: BytesMut::new(),
        };
        parts.headers.insert(X_CACHE, MISS);
        Response::from_parts(parts, Body::new(CaptureBody::new(body, capture)))
    } else {
        metrics::record_cache_lookup("bypass");
        parts.headers.insert(X_CACHE, BYPASS);
        Response::from_parts(parts, body)
    }
}

fn replay(hit: &CachedResponse) -> Response {
    let mut response = Response::new(Body::from(hit.body.clone()));
    *response.status_mut() = hit.status;
    *response.headers_mut() = hit.headers.clone();
    response.headers_mut().insert(X_CACHE, HIT);
    response
}

/// What a finished body gets stored as.
struct Capture {
    cache: Arc<ResponseCache>,
    key: String,
    status: StatusCode,
    headers: HeaderMap,
    buffer: BytesMut,
}

impl Capture {
    fn store(self) {
        tracing::debug!(key = %self.key, bytes = self.buffer.len(), "Caching response");
        let response = CachedResponse::new(self.status, self.headers, self.buffer.freeze());
        self.cache.set(&self.key, response);
    }
}

/// Tees every data frame into a [`Capture`] on its way to the client.
struct CaptureBody {
    inner: Body,
    capture: Option<Capture>,
}

impl CaptureBody {
    fn new(inner: Body, capture: Capture) -> Self {
        let mut body = Self {
            inner,
            capture: Some(capture),
        };
        // An empty body may never be polled at all.
        if body.inner.is_end_stream() {
            body.finish();
        }
        body
    }

    fn finish(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.store();
        }
    }
}

impl HttpBody for CaptureBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        let polled = Pin::new(&mut this.inner).poll_frame(cx);

        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let (Some(capture), Some(data)) = (this.capture.as_mut(), frame.data_ref()) {
                    capture.buffer.extend_from_slice(data);
                }
                // Length-delimited bodies are not polled past their last frame.
                if this.inner.is_end_stream() {
                    this.finish();
                }
            }
            Poll::Ready(Some(Err(e))) => {
                if let Some(capture) = this.capture.take() {
                    tracing::debug!(key = %capture.key, error = %e, "Body failed, not caching");
                }
            }
            Poll::Ready(None) => this.finish(),
            Poll::Pending => {}
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_capture_stores_streamed_body() {
        let cache = Arc::new(ResponseCache::new(4, Duration::from_secs(60)));
        let chunks: Vec<Result<&'static str, std::io::Error>> = vec![Ok("hello "), Ok("world")];
        let inner = Body::from_stream(futures_util::stream::iter(chunks));

        let capture = Capture {
            cache: Arc::clone(&cache),
            key: "GET|/stream".into(),
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            buffer: BytesMut::new(),
        };
        let body = Body::new(CaptureBody::new(inner, capture));
        assert!(cache.get("GET|/stream").is_none(), "nothing stored before the body is read");

        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"hello world");

        let stored = cache.get("GET|/stream").unwrap();
        assert_eq!(&stored.body[..], b"hello world");
    }

    #[tokio::test]
    async fn test_capture_empty_body() {
        let cache = Arc::new(ResponseCache::new(4, Duration::from_secs(60)));
        let capture = Capture {
            cache: Arc::clone(&cache),
            key: "GET|/empty".into(),
            status: StatusCode::NO_CONTENT,
            headers: HeaderMap::new(),
            buffer: BytesMut::new(),
        };
        let _body = CaptureBody::new(Body::empty(), capture);

        let stored = cache.get("GET|/empty").unwrap();
        assert_eq!(stored.status, StatusCode::NO_CONTENT);
        assert!(stored.body.is_empty());
    }

    #[tokio::test]
    async fn test_failed_body_is_not_cached() {
        let cache = Arc::new(ResponseCache::new(4, Duration::from_secs(60)));
        let chunks: Vec<Result<&'static str, std::io::Error>> =
            vec![Ok("partial"), Err(std::io::Error::other("reset"))];
        let inner = Body::from_stream(futures_util::stream::iter(chunks));

        let capture = Capture {
            cache: Arc::clone(&cache),
            key: "GET|/broken".into(),
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            buffer: BytesMut::new(),
        };
        let body = Body::new(CaptureBody::new(inner, capture));

        assert!(axum::body::to_bytes(body, usize::MAX).await.is_err());
        assert!(cache.get("GET|/broken").is_none());
    }
}
