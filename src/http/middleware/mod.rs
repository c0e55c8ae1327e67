//! Pipeline stages.
//!
//! Each stage wraps the next one and either delegates or answers on its own:
//!
//! | Stage | Answers by itself when |
//! |---|---|
//! | `recover` | the inner chain panics (500) |
//! | `timeout` | the deadline passes first (504) |
//! | `logging` | never |
//! | `rate_limit` | the client's bucket is empty (429) |
//! | `cache` | a live entry exists for the request |

pub mod cache;
pub mod logging;
pub mod rate_limit;
pub mod recover;
pub mod timeout;

pub use cache::{cache_middleware, X_CACHE};
pub use logging::logging_middleware;
pub use rate_limit::{
    rate_limit_middleware, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use recover::panic_response;
pub use timeout::timeout_middleware;
