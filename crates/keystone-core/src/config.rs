//! Configuration loading and typed config structures for Keystone.
//!
//! Settings come from an optional YAML or TOML file, then environment
//! variables prefixed with `KEYSTONE__` override individual fields, using
//! `__` as the nesting separator:
//!
//! ```text
//! KEYSTONE__STORE__URL=redis://cache:6379
//! KEYSTONE__TRANSACTIONS__PURCHASE_WINDOW_MS=2000
//! ```
//!
//! Every field has a default, so an empty source yields a usable config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Environment, File, FileFormat};
use serde::Deserialize;

const ENV_PREFIX: &str = "KEYSTONE";
const ENV_SEPARATOR: &str = "__";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A source could not be read or deserialized.
    #[error("failed to load config: {0}")]
    Load(#[from] config::ConfigError),

    /// The values parsed but are unusable.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level Keystone configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KeystoneConfig {
    /// Store connection settings.
    pub store: StoreConfig,
    /// Transaction windows and retry pacing.
    pub transactions: TransactionConfig,
    /// Session sweeper settings.
    pub sessions: SessionConfig,
    /// Cache invalidation sweeper settings.
    pub invalidation: InvalidationConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl KeystoneConfig {
    /// Load from an optional file plus `KEYSTONE__*` environment variables.
    ///
    /// The file format is inferred from its extension.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the file is missing or malformed,
    /// or [`ConfigError::Invalid`] if a value is out of range.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config: Self = builder
            .add_source(environment(None))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string, with overrides taken from
    /// `env` instead of the process environment.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load).
    pub fn parse(yaml: &str, env: config::Map<String, String>) -> Result<Self, ConfigError> {
        let config: Self = config::Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .add_source(environment(Some(env)))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.store.watch_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "store.watch_pool_size must be at least 1".to_owned(),
            ));
        }
        if self.sessions.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "sessions.batch_size must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

fn environment(source: Option<config::Map<String, String>>) -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
        .source(source)
}

/// Store connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis-scheme URL of the `Dragonfly` instance.
    pub url: String,
    /// Idle dedicated connections kept for `WATCH`.
    pub watch_pool_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_owned(),
            watch_pool_size: 8,
        }
    }
}

/// Per-operation transaction windows.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Window for listing an item.
    pub list_window_ms: u64,
    /// Window for purchasing an item.
    pub purchase_window_ms: u64,
    /// Window for guild autocomplete.
    pub autocomplete_window_ms: u64,
    /// Window for recording a metric.
    pub metric_window_ms: u64,
    /// Pause between conflicting attempts; 0 retries immediately.
    pub retry_delay_ms: u64,
}

impl TransactionConfig {
    /// [`list_window_ms`](Self::list_window_ms) as a [`Duration`].
    pub const fn list_window(&self) -> Duration {
        Duration::from_millis(self.list_window_ms)
    }

    /// [`purchase_window_ms`](Self::purchase_window_ms) as a [`Duration`].
    pub const fn purchase_window(&self) -> Duration {
        Duration::from_millis(self.purchase_window_ms)
    }

    /// [`autocomplete_window_ms`](Self::autocomplete_window_ms) as a [`Duration`].
    pub const fn autocomplete_window(&self) -> Duration {
        Duration::from_millis(self.autocomplete_window_ms)
    }

    /// [`metric_window_ms`](Self::metric_window_ms) as a [`Duration`].
    pub const fn metric_window(&self) -> Duration {
        Duration::from_millis(self.metric_window_ms)
    }

    /// [`retry_delay_ms`](Self::retry_delay_ms) as a [`Duration`].
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            list_window_ms: 5_000,
            purchase_window_ms: 10_000,
            autocomplete_window_ms: 5_000,
            metric_window_ms: 5_000,
            retry_delay_ms: 0,
        }
    }
}

/// Session sweeper settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions kept before the oldest are evicted.
    pub limit: u64,
    /// Most sessions evicted per pass.
    pub batch_size: u64,
    /// Sleep when under the limit.
    pub idle_interval_ms: u64,
}

impl SessionConfig {
    /// [`idle_interval_ms`](Self::idle_interval_ms) as a [`Duration`].
    pub const fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            limit: 10_000_000,
            batch_size: 100,
            idle_interval_ms: 1_000,
        }
    }
}

/// Cache invalidation sweeper settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InvalidationConfig {
    /// Sleep when no row is due.
    pub poll_interval_ms: u64,
    /// Directory holding one `<row_id>.json` file per cacheable row. Without
    /// it every due row is invalidated.
    pub row_dir: Option<PathBuf>,
}

impl InvalidationConfig {
    /// [`poll_interval_ms`](Self::poll_interval_ms) as a [`Duration`].
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            row_dir: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            json: false,
        }
    }
}
