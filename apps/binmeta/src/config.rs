//! # Application Configuration
//!
//! An optional TOML file (`--config <path>`) with two tables:
//!
//! ```toml
//! [core]
//! bucket_limit = 100
//! many_events_threshold = 1000
//!
//! [core.security]
//! ranks = ["UNCLASSIFIED", "RESTRICTED", "SECRET"]
//!
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//! rate_limit = 50
//! request_timeout_ms = 5000
//! ```
//!
//! ## Environment Overrides
//!
//! Applied after the file is read:
//! - `BINMETA_API_KEY`: bearer token required on every endpoint but `/health`
//! - `BINMETA_RATE_LIMIT`: requests per second (0 disables limiting)
//! - `BINMETA_CORS_ORIGINS`: comma-separated origins, or "*" for all
//! - `BINMETA_LOG_FORMAT`: "json" for machine-parseable logs

use crate::api::{get_api_key_from_env, get_rate_limit_from_env};
use binmeta_core::{CoreConfig, MetaError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Maximum accepted size of a configuration file (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// =============================================================================
// SERVER CONFIG
// =============================================================================

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token; `None` leaves the API open.
    pub api_key: Option<String>,
    /// Requests per second across all clients. 0 disables limiting.
    pub rate_limit: u32,
    /// Comma-separated allowed origins, or "*".
    pub cors_origins: Option<String>,
    /// Per-request read budget. Expiry answers 504.
    pub request_timeout_ms: Option<u64>,
    /// "text" or "json".
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            api_key: None,
            rate_limit: 100,
            cors_origins: None,
            request_timeout_ms: None,
            log_format: "text".to_string(),
        }
    }
}

impl ServerConfig {
    /// Overlay the `BINMETA_*` environment variables.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(key) = get_api_key_from_env() {
            self.api_key = Some(key);
        }
        if let Some(rate) = get_rate_limit_from_env() {
            self.rate_limit = rate;
        }
        if let Ok(origins) = std::env::var("BINMETA_CORS_ORIGINS") {
            self.cors_origins = Some(origins);
        }
        if let Ok(format) = std::env::var("BINMETA_LOG_FORMAT") {
            self.log_format = format;
        }
        self
    }

    /// `host:port`.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// APP CONFIG
// =============================================================================

/// Everything the binary is configured with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub core: CoreConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml(text: &str) -> Result<Self, MetaError> {
        let config: Self =
            toml::from_str(text).map_err(|e| MetaError::ConfigError(e.to_string()))?;
        config.core.validate()?;
        Ok(config)
    }

    /// Read the file at `path` if given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, MetaError> {
        let config = match path {
            Some(path) => {
                let metadata = std::fs::metadata(path).map_err(|e| {
                    MetaError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
                })?;
                if metadata.len() > MAX_CONFIG_FILE_SIZE {
                    return Err(MetaError::ConfigError(format!(
                        "Config file exceeds {} bytes",
                        MAX_CONFIG_FILE_SIZE
                    )));
                }
                let text = std::fs::read_to_string(path).map_err(|e| {
                    MetaError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
                })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        Ok(Self {
            server: config.server.with_env_overrides(),
            ..config
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
