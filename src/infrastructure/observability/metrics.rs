//! Prometheus metrics for the cache and request layers
//!
//! The `record_*` helpers are no-ops until a recorder is installed, so the
//! library can call them unconditionally.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use super::config::MetricsConfig;

/// Handle used to render the collected metrics
#[derive(Clone)]
pub struct PrometheusMetrics {
    handle: Arc<PrometheusHandle>,
}

impl PrometheusMetrics {
    /// Renders metrics in the Prometheus text format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Installs the Prometheus recorder
pub fn init_metrics(config: &MetricsConfig) -> Option<PrometheusMetrics> {
    if !config.enabled {
        tracing::info!("Prometheus metrics disabled");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            gauge!("press_query_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
            tracing::info!("Prometheus metrics initialized");

            Some(PrometheusMetrics {
                handle: Arc::new(handle),
            })
        }
        Err(e) => {
            tracing::error!("Failed to initialize Prometheus metrics: {}", e);
            None
        }
    }
}

/// Record a cache read
pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("press_query_cache_lookups_total", "result" => result).increment(1);
}

/// Record an entry removed to make room for a new one
pub fn record_cache_eviction() {
    counter!("press_query_cache_evictions_total").increment(1);
}

/// Record expired entries removed by a sweep or a lazy read
pub fn record_cache_expired(count: usize) {
    counter!("press_query_cache_expired_total").increment(count as u64);
}

/// Record a caller that joined an in-flight request instead of fetching
pub fn record_dedup_join() {
    counter!("press_query_dedup_joins_total").increment(1);
}

/// Record a single fetch attempt
pub fn record_fetch_attempt(success: bool, duration: Duration) {
    let status = if success { "success" } else { "error" };
    counter!("press_query_fetch_attempts_total", "status" => status).increment(1);
    histogram!("press_query_fetch_duration_seconds", "status" => status)
        .record(duration.as_secs_f64());
}

/// Record a mutation outcome
pub fn record_mutation(success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("press_query_mutations_total", "status" => status).increment(1);
}
