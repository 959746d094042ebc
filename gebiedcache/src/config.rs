//! User configuration file.
//!
//! Settings live in an INI file at `~/.config/gebiedcache/config.ini`
//! (platform config directory via `dirs`). A missing file means defaults;
//! a present file only needs the keys it wants to override.
//!
//! ```ini
//! [cache]
//! ttl_secs = 1800
//!
//! [retry]
//! max_retries = 2
//! backoff_ms = 1000
//! retry_missing_geometry = true
//!
//! [sources]
//! pdok_url = https://api.pdok.nl/cbs/wijken-en-buurten-2024/ogc/v1
//! overpass_url = https://overpass-api.de/api/interpreter
//! overpass_timeout_secs = 45
//!
//! [logging]
//! level = info
//! directory = /var/log/gebiedcache
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::source::{
    DEFAULT_OVERPASS_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS, OVERPASS_API_URL, PDOK_BASE_URL,
    PDOK_FALLBACK_URL,
};
use crate::store::{
    RetryPolicy, StoreConfig, DEFAULT_BACKOFF_STEP_MS, DEFAULT_MAX_RETRIES, DEFAULT_TTL_SECS,
};

/// Default log level when neither the file nor `RUST_LOG` sets one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const CONFIG_DIR_NAME: &str = "gebiedcache";
const CONFIG_FILE_NAME: &str = "config.ini";

/// Errors reading or writing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config file: {0}")]
    Parse(String),

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),
}

/// Path of the configuration file.
pub fn config_file_path() -> PathBuf {
    config_directory().join(CONFIG_FILE_NAME)
}

/// Directory holding the configuration file.
pub fn config_directory() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

// =============================================================================
// Sections
// =============================================================================

/// `[cache]` settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS,
        }
    }
}

/// `[retry]` settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub max_retries: u32,
    /// Linear backoff step; retry `n` waits `n * backoff_ms`.
    pub backoff_ms: u64,
    pub retry_missing_geometry: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_ms: DEFAULT_BACKOFF_STEP_MS,
            retry_missing_geometry: true,
        }
    }
}

/// `[sources]` settings: backend endpoints and HTTP timeouts.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcesConfig {
    pub pdok_url: String,
    pub pdok_fallback_url: String,
    pub overpass_url: String,
    pub geometry_timeout_secs: u64,
    pub overpass_timeout_secs: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            pdok_url: PDOK_BASE_URL.to_string(),
            pdok_fallback_url: PDOK_FALLBACK_URL.to_string(),
            overpass_url: OVERPASS_API_URL.to_string(),
            geometry_timeout_secs: DEFAULT_TIMEOUT_SECS,
            overpass_timeout_secs: DEFAULT_OVERPASS_TIMEOUT_SECS,
        }
    }
}

/// `[logging]` settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset (e.g. `info`,
    /// `gebiedcache=debug`).
    pub level: String,
    /// Directory for daily-rolling log files; console only when `None`.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            directory: None,
        }
    }
}

impl LoggingConfig {
    /// Set the filter directive.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Also write log files to `directory`.
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }
}

// =============================================================================
// Config File
// =============================================================================

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub cache: CacheSettings,
    pub retry: RetrySettings,
    pub sources: SourcesConfig,
    pub logging: LoggingConfig,
}

impl ConfigFile {
    /// Loads the user's config file, or defaults if it does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_file_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Loads the config file at `path`.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parses INI text. Keys that are absent keep their defaults.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let mut config = Self::default();
        for key in ConfigKey::ALL {
            if let Some(value) = ini.get_from(Some(key.section()), key.key_name()) {
                key.set(&mut config, value)?;
            }
        }
        Ok(config)
    }

    /// Writes the config to the user's config file.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = config_file_path();
        self.save_to(&path)?;
        Ok(path)
    }

    /// Writes the config to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        self.to_ini().write_to_file(path).map_err(write_error)
    }

    fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        for key in ConfigKey::ALL {
            let value = key.get(self);
            if !value.is_empty() {
                ini.with_section(Some(key.section()))
                    .set(key.key_name(), value);
            }
        }
        ini
    }

    /// Store settings derived from `[cache]` and `[retry]`.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::default()
            .with_ttl(Duration::from_secs(self.cache.ttl_secs))
            .with_retry(RetryPolicy::linear(
                self.retry.max_retries,
                Duration::from_millis(self.retry.backoff_ms),
            ))
            .with_retry_missing_geometry(self.retry.retry_missing_geometry)
    }
}

// =============================================================================
// Config Keys
// =============================================================================

/// A single `section.field` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    CacheTtlSecs,
    RetryMaxRetries,
    RetryBackoffMs,
    RetryMissingGeometry,
    SourcesPdokUrl,
    SourcesPdokFallbackUrl,
    SourcesOverpassUrl,
    SourcesGeometryTimeoutSecs,
    SourcesOverpassTimeoutSecs,
    LoggingLevel,
    LoggingDirectory,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 11] = [
        ConfigKey::CacheTtlSecs,
        ConfigKey::RetryMaxRetries,
        ConfigKey::RetryBackoffMs,
        ConfigKey::RetryMissingGeometry,
        ConfigKey::SourcesPdokUrl,
        ConfigKey::SourcesPdokFallbackUrl,
        ConfigKey::SourcesOverpassUrl,
        ConfigKey::SourcesGeometryTimeoutSecs,
        ConfigKey::SourcesOverpassTimeoutSecs,
        ConfigKey::LoggingLevel,
        ConfigKey::LoggingDirectory,
    ];

    /// Every key, in file order.
    pub fn all() -> &'static [ConfigKey] {
        &Self::ALL
    }

    /// Full `section.key` name.
    pub fn name(&self) -> String {
        format!("{}.{}", self.section(), self.key_name())
    }

    pub fn section(&self) -> &'static str {
        match self {
            Self::CacheTtlSecs => "cache",
            Self::RetryMaxRetries | Self::RetryBackoffMs | Self::RetryMissingGeometry => "retry",
            Self::SourcesPdokUrl
            | Self::SourcesPdokFallbackUrl
            | Self::SourcesOverpassUrl
            | Self::SourcesGeometryTimeoutSecs
            | Self::SourcesOverpassTimeoutSecs => "sources",
            Self::LoggingLevel | Self::LoggingDirectory => "logging",
        }
    }

    pub fn key_name(&self) -> &'static str {
        match self {
            Self::CacheTtlSecs => "ttl_secs",
            Self::RetryMaxRetries => "max_retries",
            Self::RetryBackoffMs => "backoff_ms",
            Self::RetryMissingGeometry => "retry_missing_geometry",
            Self::SourcesPdokUrl => "pdok_url",
            Self::SourcesPdokFallbackUrl => "pdok_fallback_url",
            Self::SourcesOverpassUrl => "overpass_url",
            Self::SourcesGeometryTimeoutSecs => "geometry_timeout_secs",
            Self::SourcesOverpassTimeoutSecs => "overpass_timeout_secs",
            Self::LoggingLevel => "level",
            Self::LoggingDirectory => "directory",
        }
    }

    /// Current value as text; empty when unset.
    pub fn get(&self, config: &ConfigFile) -> String {
        match self {
            Self::CacheTtlSecs => config.cache.ttl_secs.to_string(),
            Self::RetryMaxRetries => config.retry.max_retries.to_string(),
            Self::RetryBackoffMs => config.retry.backoff_ms.to_string(),
            Self::RetryMissingGeometry => config.retry.retry_missing_geometry.to_string(),
            Self::SourcesPdokUrl => config.sources.pdok_url.clone(),
            Self::SourcesPdokFallbackUrl => config.sources.pdok_fallback_url.clone(),
            Self::SourcesOverpassUrl => config.sources.overpass_url.clone(),
            Self::SourcesGeometryTimeoutSecs => config.sources.geometry_timeout_secs.to_string(),
            Self::SourcesOverpassTimeoutSecs => config.sources.overpass_timeout_secs.to_string(),
            Self::LoggingLevel => config.logging.level.clone(),
            Self::LoggingDirectory => config
                .logging
                .directory
                .as_ref()
                .map(|d| d.display().to_string())
                .unwrap_or_default(),
        }
    }

    /// Parses `value` and stores it in `config`.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match self {
            Self::CacheTtlSecs => config.cache.ttl_secs = self.positive(value)?,
            Self::RetryMaxRetries => config.retry.max_retries = self.number(value)?,
            Self::RetryBackoffMs => config.retry.backoff_ms = self.number(value)?,
            Self::RetryMissingGeometry => config.retry.retry_missing_geometry = self.flag(value)?,
            Self::SourcesPdokUrl => config.sources.pdok_url = self.url(value)?,
            Self::SourcesPdokFallbackUrl => config.sources.pdok_fallback_url = self.url(value)?,
            Self::SourcesOverpassUrl => config.sources.overpass_url = self.url(value)?,
            Self::SourcesGeometryTimeoutSecs => {
                config.sources.geometry_timeout_secs = self.positive(value)?
            }
            Self::SourcesOverpassTimeoutSecs => {
                config.sources.overpass_timeout_secs = self.positive(value)?
            }
            Self::LoggingLevel if value.is_empty() => {
                return Err(self.invalid(value, "must not be empty"))
            }
            Self::LoggingLevel => config.logging.level = value.to_string(),
            Self::LoggingDirectory => {
                config.logging.directory = (!value.is_empty()).then(|| PathBuf::from(value))
            }
        }
        Ok(())
    }

    fn invalid(&self, value: &str, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidValue {
            key: self.name(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    fn number<T>(&self, value: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        value.parse().map_err(|e: T::Err| self.invalid(value, e.to_string()))
    }

    fn positive(&self, value: &str) -> Result<u64, ConfigError> {
        match self.number(value)? {
            0 => Err(self.invalid(value, "must be greater than zero")),
            n => Ok(n),
        }
    }

    fn flag(&self, value: &str) -> Result<bool, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(self.invalid(value, "expected true or false")),
        }
    }

    fn url(&self, value: &str) -> Result<String, ConfigError> {
        if value.starts_with("http://") || value.starts_with("https://") {
            Ok(value.trim_end_matches('/').to_string())
        } else {
            Err(self.invalid(value, "expected an http(s) URL"))
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.name() == s)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}
