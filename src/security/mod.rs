//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → client.rs (derive client identity)
//!     → rate_limit.rs (per-identity token bucket)
//!     → admitted, or rejected with 429
//! ```
//!
//! # Design Decisions
//! - One bucket per identity, created lazily on first request
//! - Refill is computed on access; no timer per bucket
//! - Idle full buckets are pruned by a periodic cleanup pass

pub mod client;
pub mod rate_limit;

pub use client::client_identity;
pub use rate_limit::{RateLimitDecision, RateLimiter, TokenBucket};
