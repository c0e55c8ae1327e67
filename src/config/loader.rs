//! Configuration loading.
//!
//! Layers, lowest to highest: defaults, config file, environment, CLI flags.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

pub const ENV_CONFIG_FILE: &str = "PROXY_CONFIG_FILE";
pub const ENV_PORT: &str = "PROXY_PORT";
pub const ENV_BACKEND: &str = "PROXY_BACKEND";
pub const ENV_LOG_LEVEL: &str = "PROXY_LOG_LEVEL";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Values that override whatever the file said. Used for both the
/// environment and command-line flags.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub backend: Option<String>,
    pub log_level: Option<String>,
}

impl ConfigOverrides {
    /// Read overrides through `lookup`, normally `std::env::var`.
    pub fn from_env<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = lookup(ENV_PORT).and_then(|raw| match raw.parse() {
            Ok(port) => Some(port),
            Err(_) => {
                tracing::warn!(value = %raw, "Ignoring unparseable {}", ENV_PORT);
                None
            }
        });

        Self {
            port,
            backend: lookup(ENV_BACKEND).filter(|v| !v.is_empty()),
            log_level: lookup(ENV_LOG_LEVEL).filter(|v| !v.is_empty()),
        }
    }

    pub fn apply(&self, config: &mut ProxyConfig) {
        if let Some(port) = self.port {
            config.listener.bind_address = with_port(&config.listener.bind_address, port);
        }
        if let Some(backend) = &self.backend {
            config.backend.url = backend.clone();
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
    }
}

fn with_port(bind_address: &str, port: u16) -> String {
    match bind_address.parse::<SocketAddr>() {
        Ok(mut addr) => {
            addr.set_port(port);
            addr.to_string()
        }
        Err(_) => format!("0.0.0.0:{port}"),
    }
}

/// Parse a config file. `.json` files go through serde_json, anything else is TOML.
pub fn load_file(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(toml::from_str(&content)?)
    }
}

/// Load and validate configuration from a TOML or JSON file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let config = load_file(path)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Build the effective configuration from every source.
///
/// `file` is the `--config` flag; when absent the `PROXY_CONFIG_FILE`
/// environment variable is consulted.
pub fn load_layered<F>(
    file: Option<&Path>,
    env: F,
    flags: &ConfigOverrides,
) -> Result<ProxyConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let env_file = env(ENV_CONFIG_FILE).filter(|v| !v.is_empty()).map(PathBuf::from);

    let mut config = match file.map(Path::to_path_buf).or(env_file) {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Loading config file");
            load_file(&path)?
        }
        None => ProxyConfig::default(),
    };

    ConfigOverrides::from_env(&env).apply(&mut config);
    flags.apply(&mut config);

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}
