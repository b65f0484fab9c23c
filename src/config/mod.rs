//! Application configuration

mod app_config;

pub use app_config::{AppConfig, CacheSettings, LogFormat, LoggingConfig, QuerySettings};
