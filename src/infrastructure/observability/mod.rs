//! Observability infrastructure - Metrics

mod config;
mod metrics;

pub use config::MetricsConfig;
pub use self::metrics::{
    init_metrics, record_cache_eviction, record_cache_expired, record_cache_lookup,
    record_dedup_join, record_fetch_attempt, record_mutation, PrometheusMetrics,
};
