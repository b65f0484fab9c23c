//! Query client - owns the shared store, coordinator and lifecycle source

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use super::binding::QueryBinding;
use super::focus::FocusManager;
use crate::domain::{Fetcher, KeyPattern, QueryData, QueryError, QueryOptions, RequestOptions};
use crate::infrastructure::cache::CacheStore;
use crate::infrastructure::coordinator::RequestCoordinator;

const INVALIDATION_CHANNEL_CAPACITY: usize = 256;

/// Entry point for creating query bindings and touching cached query data
///
/// Cloning is cheap; clones share one store, coordinator and focus source.
#[derive(Debug, Clone)]
pub struct QueryClient {
    store: Arc<CacheStore>,
    coordinator: Arc<RequestCoordinator>,
    focus: FocusManager,
    invalidations: broadcast::Sender<KeyPattern>,
    defaults: QueryOptions,
}

impl QueryClient {
    pub fn new(store: Arc<CacheStore>) -> Self {
        let coordinator = Arc::new(RequestCoordinator::new(Arc::clone(&store)));
        let (invalidations, _) = broadcast::channel(INVALIDATION_CHANNEL_CAPACITY);

        Self {
            store,
            coordinator,
            focus: FocusManager::new(),
            invalidations,
            defaults: QueryOptions::default(),
        }
    }

    /// Options used by [`query`](Self::query) and [`set_query_data`](Self::set_query_data)
    pub fn with_defaults(mut self, defaults: QueryOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<RequestCoordinator> {
        &self.coordinator
    }

    pub fn focus_manager(&self) -> &FocusManager {
        &self.focus
    }

    pub fn default_options(&self) -> &QueryOptions {
        &self.defaults
    }

    /// Creates a detached binding with the client's default options
    pub fn query<T: QueryData>(&self, key: impl Into<String>, fetcher: Fetcher<T>) -> QueryBinding<T> {
        self.query_with(key, fetcher, self.defaults.clone())
    }

    pub fn query_with<T: QueryData>(
        &self,
        key: impl Into<String>,
        fetcher: Fetcher<T>,
        options: QueryOptions,
    ) -> QueryBinding<T> {
        QueryBinding::new(self.clone(), key.into(), fetcher, options)
    }

    /// Returns fresh cached data, or fetches it through the coordinator
    pub async fn fetch_query<T: QueryData>(
        &self,
        key: &str,
        fetcher: Fetcher<T>,
        options: &RequestOptions,
    ) -> Result<T, QueryError> {
        if let Some(data) = self.store.get_as::<T>(key) {
            debug!(key = %key, "Query served from cache");
            return Ok(data);
        }

        self.coordinator
            .run(key, move || fetcher(), options)
            .await
    }

    /// Warms the cache for `key` without producing a value
    pub async fn prefetch_query<T: QueryData>(
        &self,
        key: &str,
        fetcher: Fetcher<T>,
        options: &RequestOptions,
    ) -> Result<(), QueryError> {
        self.fetch_query(key, fetcher, options).await.map(|_| ())
    }

    pub fn get_query_data<T: QueryData>(&self, key: &str) -> Option<T> {
        self.store.get_as(key)
    }

    /// Writes data for `key` directly, e.g. after a mutation returned it
    pub fn set_query_data<T: QueryData>(&self, key: &str, data: &T) -> Result<(), QueryError> {
        self.store
            .set_as(key, data, self.defaults.request.set_options())
    }

    /// Deletes `key` and tells bindings on it to revalidate
    ///
    /// A request still in flight for `key` is retired, so the refresh fetches
    /// anew instead of joining it.
    pub fn invalidate(&self, key: &str) -> Result<bool, QueryError> {
        let pattern = KeyPattern::exact(key)?;
        self.coordinator.forget(key);
        let removed = self.store.delete(key);
        self.broadcast_invalidation(pattern);
        Ok(removed)
    }

    /// Deletes every key matching a glob and tells bindings on them to revalidate
    pub fn invalidate_matching(&self, pattern: &str) -> Result<usize, QueryError> {
        let pattern = KeyPattern::new(pattern)?;
        self.coordinator.forget_matching(&pattern);
        let removed = self.store.delete_pattern(&pattern);
        self.broadcast_invalidation(pattern);
        Ok(removed)
    }

    pub(crate) fn subscribe_invalidations(&self) -> broadcast::Receiver<KeyPattern> {
        self.invalidations.subscribe()
    }

    fn broadcast_invalidation(&self, pattern: KeyPattern) {
        let pattern_str = pattern.as_str().to_string();
        let bindings = self.invalidations.send(pattern).unwrap_or(0);
        info!(pattern = %pattern_str, bindings, "Invalidated queries");
    }
}
