//! Configuration layer: typed settings with layered precedence (file → env).
//!
//! ```toml
//! [logging]
//! level = "info"
//! json = false
//!
//! [cache]
//! enabled = true
//! memory_capacity = 10000
//! default_ttl_secs = 0
//! invalidate_on_insert = true
//! invalidate_on_update = true
//! invalidate_on_delete = true
//! ```

use std::{num::NonZeroUsize, path::Path, str::FromStr, time::Duration};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::events::MutationPolicy;

const ENV_PREFIX: &str = "RECORD_CACHE";
const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

/// Cache behavior switches.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch; when off, reads miss and writes are dropped.
    pub enabled: bool,
    /// Maximum entries held by the bundled `MemoryStore`.
    pub memory_capacity: usize,
    /// TTL applied when a write does not carry one. Zero or absent means
    /// entries live until invalidated.
    pub default_ttl_secs: Option<u64>,
    pub invalidate_on_insert: bool,
    pub invalidate_on_update: bool,
    pub invalidate_on_delete: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            default_ttl_secs: None,
            invalidate_on_insert: true,
            invalidate_on_update: true,
            invalidate_on_delete: true,
        }
    }
}

impl CacheConfig {
    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Mutation kinds that trigger invalidation.
    pub fn mutation_policy(&self) -> MutationPolicy {
        MutationPolicy {
            insert: self.invalidate_on_insert,
            update: self.invalidate_on_update,
            delete: self.invalidate_on_delete,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

impl Settings {
    /// Load settings from an optional file, then `RECORD_CACHE__*` variables.
    pub fn load(config_file: Option<&Path>) -> Result<Self, LoadError> {
        let mut builder = Config::builder();

        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

        let raw: RawSettings = builder.build()?.try_deserialize()?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let logging = build_logging_settings(raw.logging)?;
        let cache = build_cache_config(raw.cache)?;
        Ok(Self { logging, cache })
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    memory_capacity: Option<usize>,
    default_ttl_secs: Option<u64>,
    invalidate_on_insert: Option<bool>,
    invalidate_on_update: Option<bool>,
    invalidate_on_delete: Option<bool>,
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_config(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();

    let memory_capacity = cache.memory_capacity.unwrap_or(defaults.memory_capacity);
    if memory_capacity == 0 {
        return Err(LoadError::invalid(
            "cache.memory_capacity",
            "must be greater than zero",
        ));
    }

    Ok(CacheConfig {
        enabled: cache.enabled.unwrap_or(defaults.enabled),
        memory_capacity,
        default_ttl_secs: cache.default_ttl_secs.or(defaults.default_ttl_secs),
        invalidate_on_insert: cache
            .invalidate_on_insert
            .unwrap_or(defaults.invalidate_on_insert),
        invalidate_on_update: cache
            .invalidate_on_update
            .unwrap_or(defaults.invalidate_on_update),
        invalidate_on_delete: cache
            .invalidate_on_delete
            .unwrap_or(defaults.invalidate_on_delete),
    })
}
