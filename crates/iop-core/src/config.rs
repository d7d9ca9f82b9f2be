//! Service configuration
//!
//! Layering, lowest to highest precedence:
//! 1. compiled defaults ([`ServiceConfig::default`])
//! 2. an optional TOML file ([`ServiceConfig::load`])
//! 3. `IOP_*` environment variables ([`ServiceConfig::apply_env`])
//! 4. command line flags (applied by the binary)
//!
//! [`ServiceConfig::validate`] runs once after all layers are applied.

use iop_archive::{IntakeConfig, DEFAULT_MAX_UPLOAD_SIZE, DEFAULT_STAGING_DIR};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "IOP_";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// Config file
        path: PathBuf,
        /// Cause
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for this schema
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Override could not be parsed
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable or flag name
        key: String,
        /// Offending value
        value: String,
        /// Parse failure
        reason: String,
    },

    /// Settings are individually valid but unusable
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("expected text or json, got {other:?}")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
        })
    }
}

/// Whole-service settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Listen address
    pub listen: String,
    /// Prefix of the upload route
    pub api_prefix: String,
    /// Largest accepted upload in bytes
    pub max_upload_size: u64,
    /// Largest total unpacked size; ten times `max_upload_size` when unset
    pub unpacked_size_limit: Option<u64>,
    /// Directory for staged uploads
    pub staging_dir: PathBuf,
    /// Rule content root
    pub content_dir: PathBuf,
    /// Database file, or `:memory:`
    pub database: PathBuf,
    /// Wall-clock budget per upload in seconds
    pub request_timeout_secs: u64,
    /// Blocking workers running pipelines
    pub workers: usize,
    /// `EnvFilter` directive
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8000".to_string(),
            api_prefix: "/api/ingress/v1".to_string(),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            unpacked_size_limit: None,
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            content_dir: PathBuf::from("./rules-content"),
            database: PathBuf::from("insights.db"),
            request_timeout_secs: 300,
            workers: 8,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl ServiceConfig {
    /// Parse a TOML document; absent keys keep their defaults
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Read a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Apply `IOP_*` variables from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `IOP_*` overrides from any lookup
    ///
    /// Empty values are ignored. `IOP_UNPACKED_SIZE_LIMIT=0` restores the derived limit.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key)
                .filter(|v| !v.trim().is_empty())
                .map(|v| (key, v))
        };

        if let Some((_, v)) = get("LISTEN") {
            self.listen = v;
        }
        if let Some((_, v)) = get("API_PREFIX") {
            self.api_prefix = v;
        }
        if let Some((key, v)) = get("MAX_UPLOAD_SIZE") {
            self.max_upload_size = parse_value(&key, &v)?;
        }
        if let Some((key, v)) = get("UNPACKED_SIZE_LIMIT") {
            let limit: u64 = parse_value(&key, &v)?;
            self.unpacked_size_limit = (limit > 0).then_some(limit);
        }
        if let Some((_, v)) = get("STAGING_DIR") {
            self.staging_dir = PathBuf::from(v);
        }
        if let Some((_, v)) = get("CONTENT_DIR") {
            self.content_dir = PathBuf::from(v);
        }
        if let Some((_, v)) = get("DATABASE") {
            self.database = PathBuf::from(v);
        }
        if let Some((key, v)) = get("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_value(&key, &v)?;
        }
        if let Some((key, v)) = get("WORKERS") {
            self.workers = parse_value(&key, &v)?;
        }
        if let Some((_, v)) = get("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some((key, v)) = get("LOG_FORMAT") {
            self.log_format = parse_value(&key, &v)?;
        }
        Ok(())
    }

    /// Reject unusable settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_upload_size == 0 {
            return Err(ConfigError::Invalid("max_upload_size must be greater than zero".into()));
        }
        if self.unpacked_size_limit == Some(0) {
            return Err(ConfigError::Invalid("unpacked_size_limit must be greater than zero".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be greater than zero".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be greater than zero".into()));
        }
        if !self.api_prefix.starts_with('/') || self.api_prefix.ends_with('/') {
            return Err(ConfigError::Invalid(format!(
                "api_prefix must start with '/' and not end with one, got {:?}",
                self.api_prefix
            )));
        }
        self.listen_addr()?;
        Ok(())
    }

    /// Parsed listen address
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_value("listen", &self.listen)
    }

    /// Per-request budget
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Route that accepts uploads
    #[must_use]
    pub fn upload_path(&self) -> String {
        format!("{}/upload", self.api_prefix)
    }

    /// Intake settings derived from this config
    #[must_use]
    pub fn intake_config(&self) -> IntakeConfig {
        IntakeConfig::default()
            .with_max_upload_size(self.max_upload_size)
            .with_staging_dir(&self.staging_dir)
            .with_unpacked_size_limit(self.unpacked_size_limit)
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}
