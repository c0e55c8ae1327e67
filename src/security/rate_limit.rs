//! Per-client token bucket rate limiting.

use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::observability::metrics;

/// A token bucket with lazy, continuous refill.
///
/// Tokens are fractional and always within `0..=capacity`; they are
/// recomputed from elapsed time whenever the bucket is read.
#[derive(Debug)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket refilling at `refill_rate` tokens per second.
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self::new_at(capacity, refill_rate, Instant::now())
    }

    fn new_at(capacity: f64, refill_rate: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_rate,
            last_refill: now,
        }
    }

    /// Take one token if at least one is available.
    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&mut self, now: Instant) -> bool {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Current balance after refilling.
    pub fn tokens(&mut self) -> f64 {
        self.tokens_at(Instant::now())
    }

    fn tokens_at(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Time until the bucket is full again, from the balance at `now`.
    fn time_to_full(&mut self, now: Instant) -> Duration {
        let deficit = self.capacity - self.tokens_at(now);
        if deficit <= 0.0 || self.refill_rate <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(deficit / self.refill_rate).unwrap_or(Duration::MAX)
    }

    /// Idle since before `cutoff` and refilled to capacity.
    fn is_stale(&mut self, cutoff: Instant, now: Instant) -> bool {
        self.last_refill < cutoff && self.tokens_at(now) >= self.capacity
    }
}

/// Outcome of a single admission check, taken under one bucket lock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Configured requests per minute.
    pub limit: u32,
    /// Whole tokens left after this check.
    pub remaining: u32,
    /// Wall-clock instant the bucket will be full again.
    pub reset_at: SystemTime,
    /// Wait until `reset_at`, rounded up to whole seconds.
    pub retry_after_secs: u64,
}

/// Keyed collection of token buckets, one per client identity.
///
/// The map is sharded (`DashMap`); each bucket carries its own lock so two
/// clients never contend on the same mutex. Only the first request from a
/// new client takes a write lock on its shard.
pub struct RateLimiter {
    buckets: DashMap<String, Mutex<TokenBucket>>,
    requests_per_minute: u32,
    burst_size: u32,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32, burst_size: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            requests_per_minute,
            burst_size,
        }
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    pub fn burst_size(&self) -> u32 {
        self.burst_size
    }

    fn refill_rate(&self) -> f64 {
        self.requests_per_minute as f64 / 60.0
    }

    /// Run `f` on `identity`'s bucket, creating a full one on first use.
    ///
    /// The shard read guard is held until `f` returns, so `cleanup` cannot
    /// drop the bucket between lookup and update.
    fn with_bucket<R>(
        &self,
        identity: &str,
        now: Instant,
        f: impl FnOnce(&mut TokenBucket) -> R,
    ) -> R {
        loop {
            if let Some(entry) = self.buckets.get(identity) {
                let mut bucket = entry.value().lock();
                return f(&mut *bucket);
            }

            self.buckets
                .entry(identity.to_string())
                .or_insert_with(|| {
                    Mutex::new(TokenBucket::new_at(
                        self.burst_size as f64,
                        self.refill_rate(),
                        now,
                    ))
                });
            metrics::record_rate_limit_buckets(self.buckets.len());
        }
    }

    /// Try to admit one request from `identity`.
    pub fn allow(&self, identity: &str) -> bool {
        self.check(identity).allowed
    }

    /// Admit-or-deny plus the header values describing the bucket afterwards.
    pub fn check(&self, identity: &str) -> RateLimitDecision {
        self.check_at(identity, Instant::now(), SystemTime::now())
    }

    fn check_at(&self, identity: &str, now: Instant, wall: SystemTime) -> RateLimitDecision {
        let (allowed, remaining, wait) = self.with_bucket(identity, now, |bucket| {
            let allowed = bucket.allow_at(now);
            (allowed, bucket.tokens.floor() as u32, bucket.time_to_full(now))
        });

        RateLimitDecision {
            allowed,
            limit: self.requests_per_minute,
            remaining,
            reset_at: wall.checked_add(wait).unwrap_or(wall),
            retry_after_secs: wait.as_secs_f64().ceil() as u64,
        }
    }

    /// Whole tokens available to `identity`. Unknown clients would start
    /// with a full bucket.
    pub fn remaining_tokens(&self, identity: &str) -> u32 {
        match self.buckets.get(identity) {
            Some(entry) => entry.value().lock().tokens().floor() as u32,
            None => self.burst_size,
        }
    }

    /// When `identity`'s bucket will be full again; now if it already is or
    /// the client is unknown.
    pub fn reset_time(&self, identity: &str) -> SystemTime {
        let wall = SystemTime::now();
        match self.buckets.get(identity) {
            Some(entry) => {
                let wait = entry.value().lock().time_to_full(Instant::now());
                wall.checked_add(wait).unwrap_or(wall)
            }
            None => wall,
        }
    }

    /// Drop buckets idle for longer than `max_age` that have refilled to
    /// capacity. A bucket still owed tokens is kept so a returning client
    /// does not get a fresh burst.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        self.cleanup_at(max_age, Instant::now())
    }

    fn cleanup_at(&self, max_age: Duration, now: Instant) -> usize {
        let Some(cutoff) = now.checked_sub(max_age) else {
            return 0;
        };

        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| !bucket.get_mut().is_stale(cutoff, now));
        let removed = before.saturating_sub(self.buckets.len());

        if removed > 0 {
            tracing::debug!(removed, remaining = self.buckets.len(), "Pruned idle rate limit buckets");
        }
        metrics::record_rate_limit_buckets(self.buckets.len());
        removed
    }

    /// `(bucket count, total tokens across buckets)`.
    pub fn stats(&self) -> (usize, f64) {
        let now = Instant::now();
        let mut total = 0.0;
        let mut count = 0;
        for entry in self.buckets.iter() {
            total += entry.value().lock().tokens_at(now);
            count += 1;
        }
        (count, total)
    }
}
