//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum serve, request IDs, graceful shutdown)
//!     → pipeline.rs (recover → timeout → logging → rate limit → cache)
//!     → forward.rs (rewrite onto the backend, stream the exchange)
//!     → Send to client
//! ```

pub mod error;
pub mod forward;
pub mod middleware;
pub mod pipeline;
pub mod server;

pub use error::ProxyError;
pub use forward::Forwarder;
pub use pipeline::Pipeline;
pub use server::{HttpServer, ServerError};

pub const X_REQUEST_ID: &str = "x-request-id";
