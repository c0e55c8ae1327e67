//! Caching reverse proxy.
//!
//! Forwards every request to a single backend through a fixed pipeline:
//!
//! ```text
//!     Client Request
//!     ──────────────▶ request id ─▶ panic isolation ─▶ timeout ─▶ logging
//!                                                                   │
//!                                                                   ▼
//!     Client Response                                          rate limit
//!     ◀────────────── (X-Cache, X-RateLimit-*)                      │
//!                                                                   ▼
//!                                               backend ◀── forwarder ◀── cache
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use caching_proxy::config::{loader, ConfigOverrides};
use caching_proxy::lifecycle::{shutdown_signal, Shutdown};
use caching_proxy::observability::{logging, metrics};
use caching_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "caching-proxy")]
#[command(about = "Reverse proxy with response caching and per-client rate limiting", long_about = None)]
struct Cli {
    /// Path to a TOML or JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Backend URL (overrides the config file)
    #[arg(short, long)]
    backend: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let flags = ConfigOverrides {
        port: cli.port,
        backend: cli.backend,
        log_level: cli.log_level,
    };
    let config = loader::load_layered(cli.config.as_deref(), |key| std::env::var(key).ok(), &flags)?;

    logging::init_tracing(&config.observability.log_level);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "caching-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backend = %config.backend.url,
        cache_enabled = config.cache.enabled,
        rate_limit_enabled = config.rate_limit.enabled,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal.trigger();
    });

    let server = HttpServer::new(config)?;
    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
