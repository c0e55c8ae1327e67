//! Response caching subsystem.
//!
//! # Data Flow
//! ```text
//! request
//!     → policy.rs (cache key = METHOD|url)
//!     → store.rs lookup: hit → serve stored response (X-Cache: HIT)
//!                        miss → forward, then policy.rs decides
//!                               MISS (store) or BYPASS (don't)
//! ```
//!
//! # Design Decisions
//! - Capacity-bounded LRU; both reads and writes refresh recency
//! - TTL is checked when an entry is touched, there is no sweeper task
//! - Eligibility lives in the pipeline stage, the store caches whatever it is given

pub mod policy;
pub mod store;

pub use policy::{cache_key, is_cacheable};
pub use store::{CacheEntry, CachedResponse, ResponseCache};
