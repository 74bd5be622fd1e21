//! Hypequest Configuration Management
//!
//! Handles configuration from environment variables and config files
//! with sensible defaults for development.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Auth API configuration
    pub api: ApiConfig,

    /// Credential storage configuration
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// `from_env` is this with the process environment plugged in.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // API
        if let Some(url) = lookup("HQ_API_BASE_URL") {
            let url = url.trim().trim_end_matches('/').to_string();
            if url.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "HQ_API_BASE_URL".to_string(),
                    value: url,
                });
            }
            config.api.base_url = url;
        }
        if let Some(secs) = lookup("HQ_API_TIMEOUT_SECS") {
            let parsed = secs.parse().map_err(|_| ConfigError::InvalidValue {
                key: "HQ_API_TIMEOUT_SECS".to_string(),
                value: secs,
            })?;
            config.api.timeout_secs = Some(parsed);
        }

        // Storage
        if let Some(backend) = lookup("HQ_STORAGE_BACKEND") {
            config.storage.backend = backend.parse()?;
        }
        if let Some(dir) = lookup("HQ_STORAGE_DIR") {
            config.storage.dir = PathBuf::from(dir);
        }

        // Logging
        if let Some(level) = lookup("LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(json) = lookup("LOG_JSON") {
            config.logging.json_format = matches!(json.as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(self) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;
        Ok(self.merge(env_config))
    }

    /// Overlay values from `other` that differ from the defaults.
    fn merge(mut self, other: Self) -> Self {
        let api_defaults = ApiConfig::default();
        let storage_defaults = StorageConfig::default();
        let logging_defaults = LoggingConfig::default();

        if other.api.base_url != api_defaults.base_url {
            self.api.base_url = other.api.base_url;
        }
        if other.api.timeout_secs.is_some() {
            self.api.timeout_secs = other.api.timeout_secs;
        }
        if other.storage.backend != storage_defaults.backend {
            self.storage.backend = other.storage.backend;
        }
        if other.storage.dir != storage_defaults.dir {
            self.storage.dir = other.storage.dir;
        }
        if other.logging.level != logging_defaults.level {
            self.logging.level = other.logging.level;
        }
        if other.logging.json_format {
            self.logging.json_format = true;
        }

        self
    }
}

/// Auth API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL the `/api/auth/*` paths are joined to
    pub base_url: String,

    /// Request timeout in seconds; `None` keeps the HTTP client's default
    pub timeout_secs: Option<u64>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: None,
        }
    }
}

/// Join a base URL and a path with exactly one slash between them.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Credential storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Which backend holds the token pair
    pub backend: StorageBackend,

    /// Directory for the file backend
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let dir = std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(".hypequest"))
            .unwrap_or_else(|_| PathBuf::from(".hypequest"));

        Self {
            backend: StorageBackend::File,
            dir,
        }
    }
}

/// Supported credential storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process memory only; the session ends with the process
    Memory,
    /// JSON file on disk; the session survives restarts
    File,
}

impl std::str::FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            _ => Err(ConfigError::InvalidValue {
                key: "HQ_STORAGE_BACKEND".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
