//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! defaults
//!     → config file (TOML, or JSON by extension)
//!     → PROXY_* environment variables
//!     → command-line flags
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//! ```
//!
//! The pipeline only ever sees the final record; nothing below this module
//! reads the environment or the filesystem.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigError, ConfigOverrides};
pub use schema::{
    AdminConfig, BackendConfig, CacheConfig, ListenerConfig, ObservabilityConfig, ProxyConfig,
    RateLimitConfig, TimeoutConfig,
};
