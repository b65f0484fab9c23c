//! Periodic removal of expired cache entries

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use super::store::{CacheStore, DEFAULT_SWEEP_INTERVAL};

/// Handle of a running sweeper; the task stops when the handle is dropped
#[derive(Debug)]
pub struct SweeperHandle {
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn stop(self) {
        // Drop aborts the task
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl CacheStore {
    /// Starts sweeping expired entries on the configured interval
    ///
    /// The task only holds a weak reference and exits once the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let period = if self.config().sweep_interval.is_zero() {
            DEFAULT_SWEEP_INTERVAL
        } else {
            self.config().sweep_interval
        };
        let store = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let Some(store) = store.upgrade() else {
                    debug!("Cache store dropped, stopping sweeper");
                    break;
                };

                let removed = store.sweep_expired();
                if removed > 0 {
                    debug!(removed, "Swept expired cache entries");
                }
            }
        });

        SweeperHandle { handle }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::domain::SetOptions;
    use crate::infrastructure::cache::CacheStoreConfig;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired_entries() {
        let store = Arc::new(CacheStore::with_config(
            CacheStoreConfig::default().with_sweep_interval(Duration::from_secs(1)),
        ));
        let _sweeper = store.spawn_sweeper();

        store.set("a", json!(1), SetOptions::new(Duration::from_millis(100)));
        store.set("b", json!(2), SetOptions::new(Duration::from_secs(60)));

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(store.len(), 1);
        assert!(store.has("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_default_interval_is_five_minutes() {
        let store = Arc::new(CacheStore::new());
        let _sweeper = store.spawn_sweeper();

        store.set("a", json!(1), SetOptions::new(Duration::from_secs(1)));

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(store.len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_with_store() {
        let store = Arc::new(CacheStore::with_config(
            CacheStoreConfig::default().with_sweep_interval(Duration::from_millis(10)),
        ));
        let sweeper = store.spawn_sweeper();

        drop(store);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(sweeper.is_finished());
    }
}
