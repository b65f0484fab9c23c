use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::domain::{Priority, QueryOptions, RequestOptions};
use crate::infrastructure::cache::CacheStoreConfig;
use crate::infrastructure::observability::MetricsConfig;

/// Application configuration
///
/// Every section falls back to its defaults, so an empty source is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub cache: CacheSettings,
    pub query: QuerySettings,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Cache store settings (durations in milliseconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub max_entries: usize,
    pub default_ttl_ms: u64,
    pub sweep_interval_ms: u64,
}

/// Default query options (durations in milliseconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    pub stale_time_ms: u64,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub dedupe_window_ms: u64,
    pub refetch_on_window_focus: bool,
    /// Polling period; absent or zero disables polling
    pub refetch_interval_ms: Option<u64>,
    pub priority: Priority,
    pub enable_preload: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl_ms: 300_000,
            sweep_interval_ms: 300_000,
        }
    }
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            stale_time_ms: 30_000,
            retry_count: 3,
            retry_delay_ms: 1000,
            dedupe_window_ms: 2000,
            refetch_on_window_focus: true,
            refetch_interval_ms: None,
            priority: Priority::default(),
            enable_preload: false,
        }
    }
}

impl AppConfig {
    /// Loads `config/default`, `config/local`, then `PRESS__*` environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::build(
            Config::builder()
                .add_source(File::with_name("config/default").required(false))
                .add_source(File::with_name("config/local").required(false))
                .add_source(
                    Environment::with_prefix("PRESS")
                        .prefix_separator("__")
                        .separator("__")
                        .try_parsing(true),
                ),
        )
    }

    /// Parses configuration from a TOML document
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        Self::build(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.sweep_interval_ms == 0 {
            return Err(ConfigError::Message(
                "cache.sweep_interval_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn store_config(&self) -> CacheStoreConfig {
        CacheStoreConfig::default()
            .with_max_entries(self.cache.max_entries)
            .with_sweep_interval(Duration::from_millis(self.cache.sweep_interval_ms))
    }

    pub fn request_options(&self) -> RequestOptions {
        let query = &self.query;

        RequestOptions::default()
            .with_retry(query.retry_count, Duration::from_millis(query.retry_delay_ms))
            .with_dedupe_window(Duration::from_millis(query.dedupe_window_ms))
            .with_ttl(Duration::from_millis(self.cache.default_ttl_ms))
            .with_priority(query.priority)
            .with_preload(query.enable_preload)
    }

    pub fn query_options(&self) -> QueryOptions {
        let mut options = QueryOptions::default()
            .with_request(self.request_options())
            .with_stale_time(Duration::from_millis(self.query.stale_time_ms))
            .with_refetch_on_window_focus(self.query.refetch_on_window_focus);

        if let Some(interval_ms) = self.query.refetch_interval_ms {
            options = options.with_refetch_interval(Duration::from_millis(interval_ms));
        }

        options
    }
}
