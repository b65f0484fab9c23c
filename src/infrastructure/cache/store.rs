//! Bounded in-memory cache store
//!
//! Features:
//! - TTL per entry, enforced lazily on read and eagerly by the sweeper
//! - Priority-based eviction when capacity is reached (ties: least recently accessed)
//! - Optional preload signal at 80% of an entry's TTL
//!
//! Values are kept as JSON so one store can hold every resource type.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::cache::{preload_delay, CacheStats, KeyPattern, Priority, SetOptions};
use crate::domain::QueryError;
use crate::infrastructure::observability::{
    record_cache_eviction, record_cache_expired, record_cache_lookup,
};

/// Interval of the periodic expiry sweep
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

const PRELOAD_CHANNEL_CAPACITY: usize = 256;

/// Configuration for the cache store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStoreConfig {
    /// Maximum number of entries
    pub max_entries: usize,
    /// Sweep cadence used by [`CacheStore::spawn_sweeper`]
    pub sweep_interval: Duration,
}

impl Default for CacheStoreConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl CacheStoreConfig {
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

/// Emitted when a preloading entry reaches 80% of its TTL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadSignal {
    pub key: String,
}

#[derive(Debug)]
struct CacheEntry {
    value: Value,
    stored_at: Instant,
    last_accessed_at: Instant,
    access_count: u64,
    ttl: Duration,
    priority: Priority,
    preload: Option<JoinHandle<()>>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.ttl.is_zero() || now.saturating_duration_since(self.stored_at) > self.ttl
    }
}

impl Drop for CacheEntry {
    fn drop(&mut self) {
        // A replaced, deleted or evicted entry must not signal anymore
        if let Some(handle) = self.preload.take() {
            handle.abort();
        }
    }
}

/// Process-wide cache store, shared behind an `Arc`
///
/// Every operation completes under a single lock acquisition and never
/// awaits, so callers never observe a partial update.
#[derive(Debug)]
pub struct CacheStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
    config: CacheStoreConfig,
    preload_tx: broadcast::Sender<PreloadSignal>,
}

impl CacheStore {
    /// Creates a store with default configuration
    pub fn new() -> Self {
        Self::with_config(CacheStoreConfig::default())
    }

    pub fn with_config(config: CacheStoreConfig) -> Self {
        let (preload_tx, _) = broadcast::channel(PRELOAD_CHANNEL_CAPACITY);

        Self {
            entries: Mutex::new(HashMap::new()),
            config,
            preload_tx,
        }
    }

    pub fn config(&self) -> &CacheStoreConfig {
        &self.config
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a value, evicting another entry first if the store is full
    pub fn set(&self, key: &str, value: Value, options: SetOptions) {
        let now = Instant::now();
        let mut entries = self.entries();

        if options.ttl.is_zero() {
            entries.remove(key);
            debug!(key = %key, "Zero TTL, value treated as already expired");
            return;
        }

        if self.config.max_entries == 0 {
            return;
        }

        if !entries.contains_key(key) && entries.len() >= self.config.max_entries {
            Self::make_room(&mut entries, now, self.config.max_entries);
        }

        let preload = if options.preload {
            self.schedule_preload(key, options.ttl)
        } else {
            None
        };

        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: now,
                last_accessed_at: now,
                access_count: 0,
                ttl: options.ttl,
                priority: options.priority,
                preload,
            },
        );
    }

    /// Serializes and stores a typed value
    pub fn set_as<V: Serialize>(
        &self,
        key: &str,
        value: &V,
        options: SetOptions,
    ) -> Result<(), QueryError> {
        let value = serde_json::to_value(value).map_err(|e| {
            QueryError::serialization(format!("Failed to serialize cache value: {}", e))
        })?;
        self.set(key, value, options);
        Ok(())
    }

    /// Returns a fresh value, deleting it instead if it has expired
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut entries = self.entries();

        let fresh = entries.get(key).map(|entry| !entry.is_expired(now));

        match fresh {
            Some(true) => {
                let entry = entries.get_mut(key)?;
                entry.last_accessed_at = now;
                entry.access_count += 1;
                record_cache_lookup(true);
                Some(entry.value.clone())
            }
            Some(false) => {
                entries.remove(key);
                record_cache_expired(1);
                record_cache_lookup(false);
                debug!(key = %key, "Cache entry expired on read");
                None
            }
            None => {
                record_cache_lookup(false);
                None
            }
        }
    }

    /// Returns a fresh value deserialized as `V`
    ///
    /// A value of another shape is a miss, not an error.
    pub fn get_as<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        let value = self.get(key)?;

        match serde_json::from_value(value) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Cached value does not match requested type");
                None
            }
        }
    }

    /// Freshness check that leaves access statistics untouched
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries()
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Time since a fresh entry was stored
    pub fn age(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries()
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| now.saturating_duration_since(entry.stored_at))
    }

    /// Number of reads served by a fresh entry
    pub fn access_count(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        self.entries()
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.access_count)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries().remove(key).is_some()
    }

    /// Deletes every key matching a glob pattern (`*` matches any run of characters)
    pub fn delete_matching(&self, pattern: &str) -> Result<usize, QueryError> {
        let pattern = KeyPattern::new(pattern)?;
        Ok(self.delete_pattern(&pattern))
    }

    pub fn delete_pattern(&self, pattern: &KeyPattern) -> usize {
        let mut entries = self.entries();
        let before = entries.len();

        entries.retain(|key, _| !pattern.matches(key));

        let deleted = before - entries.len();
        debug!(pattern = %pattern.as_str(), deleted, "Deleted matching cache entries");
        deleted
    }

    /// Keys currently matching a glob pattern, expired entries included
    pub fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, QueryError> {
        let pattern = KeyPattern::new(pattern)?;
        Ok(self
            .entries()
            .keys()
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect())
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Number of entries held, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Removes all expired entries, returning how many were dropped
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();

        entries.retain(|_, entry| !entry.is_expired(now));

        let removed = before - entries.len();
        if removed > 0 {
            record_cache_expired(removed);
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.entries();

        let expired = entries
            .values()
            .filter(|entry| entry.is_expired(now))
            .count();
        let approx_bytes = entries
            .iter()
            .map(|(key, entry)| key.len() + serde_json::to_vec(&entry.value).map_or(0, |v| v.len()))
            .sum();

        CacheStats {
            items: entries.len(),
            expired,
            approx_bytes,
            capacity: self.config.max_entries,
        }
    }

    /// Subscribes to preload signals of every entry written with `preload`
    pub fn subscribe_preload(&self) -> broadcast::Receiver<PreloadSignal> {
        self.preload_tx.subscribe()
    }

    fn make_room(entries: &mut HashMap<String, CacheEntry>, now: Instant, capacity: usize) {
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let expired = before - entries.len();
        if expired > 0 {
            record_cache_expired(expired);
        }

        while entries.len() >= capacity {
            let victim = entries
                .iter()
                .min_by(|(_, a), (_, b)| {
                    a.priority
                        .cmp(&b.priority)
                        .then(a.last_accessed_at.cmp(&b.last_accessed_at))
                })
                .map(|(key, _)| key.clone());

            let Some(victim) = victim else {
                break;
            };

            if let Some(entry) = entries.remove(&victim) {
                debug!(
                    key = %victim,
                    priority = entry.priority.value(),
                    "Evicted cache entry to make room"
                );
                record_cache_eviction();
            }
        }
    }

    fn schedule_preload(&self, key: &str, ttl: Duration) -> Option<JoinHandle<()>> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(key = %key, "Preload requested outside a Tokio runtime, skipping");
                return None;
            }
        };

        let tx = self.preload_tx.clone();
        let signal = PreloadSignal {
            key: key.to_string(),
        };
        let delay = preload_delay(ttl);

        Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(key = %signal.key, "Cache entry nearing expiry, sending preload signal");
            // No receivers is fine: nobody asked to be told
            let _ = tx.send(signal);
        }))
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}
