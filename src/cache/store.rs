//! In-memory response store with LRU eviction and per-entry TTL.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;

use crate::observability::metrics;

/// Snapshot of an upstream response. Never mutated once stored.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    /// Multi-map; repeated header names keep every value.
    pub headers: HeaderMap,
    pub body: Bytes,
    pub created_at: SystemTime,
}

impl CachedResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            created_at: SystemTime::now(),
        }
    }
}

/// A stored response and the instant it stops being servable.
#[derive(Debug)]
pub struct CacheEntry {
    pub response: Arc<CachedResponse>,
    pub expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Thread-safe LRU + TTL cache keyed by request fingerprint.
///
/// The key map and the recency order live behind one lock: a hit reorders
/// entries, so even `get` needs exclusive access. Expired entries are
/// dropped lazily by whoever touches them next.
pub struct ResponseCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    capacity: usize,
    ttl: Duration,
}

impl ResponseCache {
    /// Create a cache holding at most `capacity` entries (a zero capacity
    /// is treated as one).
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            capacity: cap.get(),
            ttl,
        }
    }

    /// Look up a live entry, promoting it to most-recently-used.
    pub fn get(&self, key: &str) -> Option<Arc<CachedResponse>> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<Arc<CachedResponse>> {
        let mut entries = self.entries.lock();

        let expired = entries.peek(key)?.is_expired(now);
        if expired {
            entries.pop(key);
            tracing::debug!(key = %key, "Cache entry expired");
            metrics::record_cache_size(entries.len());
            return None;
        }

        entries.get(key).map(|entry| Arc::clone(&entry.response))
    }

    /// Insert or replace `key`. Replacing refreshes the TTL and recency;
    /// inserting past capacity evicts the least-recently-used entry.
    pub fn set(&self, key: &str, response: CachedResponse) {
        self.set_at(key, response, Instant::now());
    }

    fn set_at(&self, key: &str, response: CachedResponse, now: Instant) {
        let entry = CacheEntry {
            response: Arc::new(response),
            expires_at: now + self.ttl,
        };

        let mut entries = self.entries.lock();
        if let Some((evicted, _)) = entries.push(key.to_string(), entry) {
            if evicted != key {
                tracing::debug!(evicted = %evicted, "Cache full, evicted least recently used entry");
            }
        }
        metrics::record_cache_size(entries.len());
    }

    /// Remove every entry, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let removed = entries.len();
        entries.clear();
        metrics::record_cache_size(0);
        removed
    }

    /// Number of stored entries (expired ones included until touched).
    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    /// `(size, capacity)`.
    pub fn stats(&self) -> (usize, usize) {
        (self.size(), self.capacity)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &'static str) -> CachedResponse {
        CachedResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::from_static(body.as_bytes()))
    }

    fn body_of(cache: &ResponseCache, key: &str) -> Option<Bytes> {
        cache.get(key).map(|r| r.body.clone())
    }

    #[test]
    fn test_get_missing() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        assert!(cache.get("GET|/none").is_none());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.set("k1", response("1"));
        cache.set("k2", response("2"));
        cache.set("k3", response("3"));

        assert_eq!(cache.size(), 2);
        assert!(cache.get("k1").is_none());
        assert_eq!(body_of(&cache, "k2").as_deref(), Some(&b"2"[..]));
        assert_eq!(body_of(&cache, "k3").as_deref(), Some(&b"3"[..]));
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let cache = ResponseCache::new(3, Duration::from_secs(60));
        for i in 0..50 {
            cache.set(&format!("k{i}"), response("x"));
            assert!(cache.size() <= 3);
        }
        assert_eq!(cache.stats(), (3, 3));
        // Only the last three survive.
        assert!(cache.get("k46").is_none());
        assert!(cache.get("k47").is_some());
        assert!(cache.get("k49").is_some());
    }

    #[test]
    fn test_get_promotes() {
        let cache = ResponseCache::new(3, Duration::from_secs(60));
        cache.set("k1", response("1"));
        cache.set("k2", response("2"));
        cache.set("k3", response("3"));

        assert!(cache.get("k1").is_some());
        cache.set("k4", response("4"));

        assert!(cache.get("k2").is_none());
        assert!(cache.get("k1").is_some());
        assert!(cache.get("k3").is_some());
        assert!(cache.get("k4").is_some());
    }

    #[test]
    fn test_set_existing_promotes_and_replaces() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.set("k1", response("old"));
        cache.set("k2", response("2"));
        cache.set("k1", response("new"));
        assert_eq!(cache.size(), 2);

        cache.set("k3", response("3"));
        assert!(cache.get("k2").is_none());
        assert_eq!(body_of(&cache, "k1").as_deref(), Some(&b"new"[..]));
    }

    #[test]
    fn test_expiry_is_checked_on_read() {
        let cache = ResponseCache::new(4, Duration::from_secs(10));
        let start = Instant::now();
        cache.set_at("k1", response("1"), start);

        assert!(cache.get_at("k1", start + Duration::from_secs(10)).is_some());
        assert!(cache.get_at("k1", start + Duration::from_millis(10_001)).is_none());
        assert_eq!(cache.size(), 0, "expired entry is purged by the reader");
    }

    #[test]
    fn test_replace_resets_expiry() {
        let cache = ResponseCache::new(4, Duration::from_secs(10));
        let start = Instant::now();
        cache.set_at("k1", response("1"), start);
        cache.set_at("k1", response("2"), start + Duration::from_secs(8));

        let later = start + Duration::from_secs(15);
        assert_eq!(
            cache.get_at("k1", later).map(|r| r.body.clone()).as_deref(),
            Some(&b"2"[..])
        );
    }

    #[test]
    fn test_ttl_real_clock() {
        let cache = ResponseCache::new(4, Duration::from_secs(1));
        cache.set("k1", response("1"));
        assert!(cache.get("k1").is_some());

        std::thread::sleep(Duration::from_millis(1100));
        assert!(cache.get("k1").is_none());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_headers_keep_duplicates() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", "a=1".parse().unwrap());
        headers.append("set-cookie", "b=2".parse().unwrap());

        let cache = ResponseCache::new(1, Duration::from_secs(60));
        cache.set("k", CachedResponse::new(StatusCode::OK, headers, Bytes::new()));

        let hit = cache.get("k").unwrap();
        assert_eq!(hit.headers.get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn test_clear() {
        let cache = ResponseCache::new(4, Duration::from_secs(60));
        cache.set("k1", response("1"));
        cache.set("k2", response("2"));
        assert_eq!(cache.clear(), 2);
        assert_eq!(cache.stats(), (0, 4));
        assert!(cache.get("k1").is_none());
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let cache = ResponseCache::new(0, Duration::from_secs(60));
        cache.set("k1", response("1"));
        cache.set("k2", response("2"));
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(ResponseCache::new(16, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let key = format!("k{}", (t * 7 + i) % 32);
                        cache.set(&key, response("v"));
                        let _ = cache.get(&key);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.size() <= 16);
    }
}
