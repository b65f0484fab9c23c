//! Request coordinator - in-flight deduplication, retry and cache write-through

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::{KeyPattern, QueryError, RequestOptions};
use crate::infrastructure::cache::CacheStore;
use crate::infrastructure::observability::{record_dedup_join, record_fetch_attempt};

type SharedOutcome = Shared<BoxFuture<'static, Result<Value, QueryError>>>;
type InFlightTable = Mutex<HashMap<String, InFlight>>;

/// Bookkeeping for the single pending operation of a key
struct InFlight {
    generation: u64,
    started_at: Instant,
    outcome: SharedOutcome,
    waiters: Arc<AtomicUsize>,
    abort: AbortHandle,
}

/// Removes the table entry of its operation when the operation ends
///
/// Runs on success, failure, abort and panic alike. A newer operation that
/// superseded this one keeps its entry.
struct SettleGuard {
    table: Arc<InFlightTable>,
    key: String,
    generation: u64,
}

impl SettleGuard {
    /// Whether the table entry for the key still belongs to this operation
    fn is_current(&self, table: &HashMap<String, InFlight>) -> bool {
        table
            .get(&self.key)
            .is_some_and(|in_flight| in_flight.generation == self.generation)
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        let mut table = lock(&self.table);
        if self.is_current(&table) {
            table.remove(&self.key);
        }
    }
}

/// Counts a caller as waiting for as long as it is awaiting the outcome
struct WaiterGuard(Arc<AtomicUsize>);

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock(table: &InFlightTable) -> MutexGuard<'_, HashMap<String, InFlight>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wraps fetch operations so each key has at most one request in flight
///
/// Operations run in their own task: a caller that stops waiting does not
/// cancel the request for the others. Successful results are written to the
/// [`CacheStore`] before any waiter resolves.
pub struct RequestCoordinator {
    store: Arc<CacheStore>,
    in_flight: Arc<InFlightTable>,
    next_generation: AtomicU64,
}

impl std::fmt::Debug for RequestCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

impl RequestCoordinator {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self {
            store,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Runs `fetch` for `key`, or joins the request already in flight for it
    ///
    /// Every caller that joins the same request gets the same value or the
    /// same error. Only the final error after all retries is returned.
    pub async fn run<T, F, Fut>(
        &self,
        key: &str,
        fetch: F,
        options: &RequestOptions,
    ) -> Result<T, QueryError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let (outcome, waiters) = self.join_or_start(key, fetch, options);
        let _waiter = WaiterGuard(waiters);

        let value = outcome.await?;

        serde_json::from_value(value).map_err(|e| {
            QueryError::serialization(format!("Response for '{}' has unexpected shape: {}", key, e))
        })
    }

    /// Aborts the request in flight for `key`; its waiters get [`QueryError::Cancelled`]
    pub fn cancel(&self, key: &str) -> bool {
        let removed = lock(&self.in_flight).remove(key);

        match removed {
            Some(in_flight) => {
                debug!(key = %key, "Cancelling in-flight request");
                in_flight.abort.abort();
                true
            }
            None => false,
        }
    }

    /// Retires the request in flight for `key` without aborting it
    ///
    /// Its current waiters still get its result, but the next [`run`](Self::run)
    /// starts a new request and the retired one no longer writes to the cache.
    pub fn forget(&self, key: &str) -> bool {
        let forgotten = lock(&self.in_flight).remove(key).is_some();
        if forgotten {
            debug!(key = %key, "Retired in-flight request");
        }
        forgotten
    }

    /// [`forget`](Self::forget) for every key matching `pattern`
    pub fn forget_matching(&self, pattern: &KeyPattern) -> usize {
        let mut table = lock(&self.in_flight);
        let before = table.len();
        table.retain(|key, _| !pattern.matches(key));
        let forgotten = before - table.len();

        if forgotten > 0 {
            debug!(pattern = %pattern.as_str(), forgotten, "Retired in-flight requests");
        }
        forgotten
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        lock(&self.in_flight).contains_key(key)
    }

    /// Callers currently awaiting the request in flight for `key`
    pub fn waiters(&self, key: &str) -> Option<usize> {
        lock(&self.in_flight)
            .get(key)
            .map(|in_flight| in_flight.waiters.load(Ordering::SeqCst))
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    fn join_or_start<T, F, Fut>(
        &self,
        key: &str,
        fetch: F,
        options: &RequestOptions,
    ) -> (SharedOutcome, Arc<AtomicUsize>)
    where
        T: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let now = Instant::now();
        let mut table = lock(&self.in_flight);

        if let Some(existing) = table.get(key) {
            let age = now.saturating_duration_since(existing.started_at);

            if age <= options.dedupe_window {
                existing.waiters.fetch_add(1, Ordering::SeqCst);
                record_dedup_join();
                debug!(key = %key, age_ms = age.as_millis() as u64, "Joining in-flight request");
                return (existing.outcome.clone(), Arc::clone(&existing.waiters));
            }

            debug!(
                key = %key,
                age_ms = age.as_millis() as u64,
                "In-flight request is outside the dedupe window, starting a new one"
            );
        }

        let in_flight = self.start(key, fetch, options, now);
        let handles = (in_flight.outcome.clone(), Arc::clone(&in_flight.waiters));
        table.insert(key.to_string(), in_flight);

        handles
    }

    fn start<T, F, Fut>(
        &self,
        key: &str,
        fetch: F,
        options: &RequestOptions,
        now: Instant,
    ) -> InFlight
    where
        T: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let table = Arc::clone(&self.in_flight);
        let store = Arc::clone(&self.store);
        let owned_key = key.to_string();
        let options = options.clone();

        // Built inside the task: dropping it unpolled must not lock the table held here
        let task = tokio::spawn(async move {
            let settle = SettleGuard {
                table,
                key: owned_key,
                generation,
            };
            let key = settle.key.as_str();

            let result = fetch_with_retry(key, &fetch, &options)
                .await
                .and_then(|value| {
                    serde_json::to_value(value).map_err(|e| {
                        QueryError::serialization(format!("Failed to serialize response: {}", e))
                    })
                });

            if let Ok(value) = &result {
                let table = lock(&settle.table);
                if settle.is_current(&table) {
                    store.set(key, value.clone(), options.set_options());
                } else {
                    debug!(key = %key, generation, "Request was superseded, not writing its result");
                }
            }

            result
        });

        let abort = task.abort_handle();
        let outcome = async move {
            match task.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(QueryError::Cancelled),
                Err(e) => Err(QueryError::internal(format!("Fetch task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        debug!(key = %key, generation, "Started request");

        InFlight {
            generation,
            started_at: now,
            outcome,
            waiters: Arc::new(AtomicUsize::new(1)),
            abort,
        }
    }
}

/// Calls `fetch` until it succeeds or `retry_count` extra attempts are used up
///
/// Attempt `n + 1` waits `retry_delay * n`. A cancelled attempt is final.
pub(crate) async fn fetch_with_retry<T, F, Fut>(
    key: &str,
    fetch: &F,
    options: &RequestOptions,
) -> Result<T, QueryError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, QueryError>>,
{
    let max_attempts = options.retry_count.saturating_add(1);
    let mut last_error = None;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            tokio::time::sleep(options.delay_for_attempt(attempt)).await;
        }

        let started = Instant::now();

        match fetch().await {
            Ok(value) => {
                record_fetch_attempt(true, started.elapsed());
                if attempt > 0 {
                    debug!(key = %key, attempts = attempt + 1, "Fetch succeeded after retry");
                }
                return Ok(value);
            }
            Err(QueryError::Cancelled) => {
                debug!(key = %key, "Fetch cancelled, not retrying");
                return Err(QueryError::Cancelled);
            }
            Err(e) => {
                record_fetch_attempt(false, started.elapsed());
                warn!(
                    key = %key,
                    attempt = attempt + 1,
                    max_attempts,
                    error = %e,
                    "Fetch attempt failed"
                );
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| QueryError::internal("No fetch attempt was made")))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use futures::future::join_all;
    use serde_json::json;

    use super::*;

    fn counting_fetch(
        calls: Arc<AtomicUsize>,
        latency: Duration,
        value: u32,
    ) -> impl Fn() -> BoxFuture<'static, Result<u32, QueryError>> + Send + Sync + 'static {
        move || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(latency).await;
                Ok(value)
            }
            .boxed()
        }
    }

    /// Fails `failures` times, then returns `value`
    fn flaky_fetch(
        calls: Arc<AtomicUsize>,
        failures: usize,
        value: u32,
    ) -> impl Fn() -> BoxFuture<'static, Result<u32, QueryError>> + Send + Sync + 'static {
        move || {
            let calls = Arc::clone(&calls);
            async move {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                if call < failures {
                    Err(QueryError::fetch_with_status(503, format!("attempt {}", call + 1)))
                } else {
                    Ok(value)
                }
            }
            .boxed()
        }
    }

    fn coordinator() -> RequestCoordinator {
        RequestCoordinator::new(Arc::new(CacheStore::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_runs_share_one_fetch() {
        let coordinator = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = RequestOptions::default();

        let runs = (0..5).map(|_| {
            coordinator.run(
                "articles:page=1",
                counting_fetch(Arc::clone(&calls), Duration::from_millis(50), 42),
                &options,
            )
        });
        let results = join_all(runs).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r == &Ok(42)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_writes_through_and_clears_bookkeeping() {
        let coordinator = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));

        let value = coordinator
            .run(
                "tags",
                counting_fetch(calls, Duration::from_millis(10), 7),
                &RequestOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(coordinator.store().get("tags"), Some(json!(7)));
        assert!(!coordinator.is_in_flight("tags"));
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let coordinator = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = RequestOptions::default().with_retry(3, Duration::from_millis(10));

        let result = coordinator
            .run("categories", flaky_fetch(Arc::clone(&calls), 2, 5), &options)
            .await;

        assert_eq!(result, Ok(5));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_uses_linear_backoff() {
        let coordinator = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = RequestOptions::default().with_retry(3, Duration::from_millis(100));
        let started = Instant::now();

        coordinator
            .run("categories", flaky_fetch(calls, 3, 5), &options)
            .await
            .unwrap();

        // 100 + 200 + 300
        assert_eq!(started.elapsed(), Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_reject_every_waiter() {
        let coordinator = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = RequestOptions::default().with_retry(2, Duration::from_millis(10));

        let runs = (0..3).map(|_| {
            coordinator.run::<u32, _, _>("comments", flaky_fetch(Arc::clone(&calls), 10, 1), &options)
        });
        let results = join_all(runs).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let expected = Err(QueryError::fetch_with_status(503, "attempt 3"));
        assert!(results.iter().all(|r| r == &expected));
        assert_eq!(coordinator.store().get("comments"), None);
        assert!(!coordinator.is_in_flight("comments"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_call_after_failure_starts_fresh() {
        let coordinator = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = RequestOptions::default().with_retry(0, Duration::ZERO);

        let first = coordinator
            .run("comments", flaky_fetch(Arc::clone(&calls), 1, 9), &options)
            .await;
        let second = coordinator
            .run("comments", flaky_fetch(Arc::clone(&calls), 1, 9), &options)
            .await;

        assert!(first.is_err());
        assert_eq!(second, Ok(9));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_outside_dedupe_window_is_superseded() {
        let coordinator = Arc::new(coordinator());
        let calls = Arc::new(AtomicUsize::new(0));
        let options = RequestOptions::default().with_dedupe_window(Duration::from_millis(10));

        let first = {
            let coordinator = Arc::clone(&coordinator);
            let calls = Arc::clone(&calls);
            let options = options.clone();
            tokio::spawn(async move {
                coordinator
                    .run("articles", counting_fetch(calls, Duration::from_millis(100), 1), &options)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = coordinator
            .run(
                "articles",
                counting_fetch(Arc::clone(&calls), Duration::from_millis(100), 2),
                &options,
            )
            .await;

        assert_eq!(first.await.unwrap(), Ok(1));
        assert_eq!(second, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!coordinator.is_in_flight("articles"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_request_settling_last_keeps_newer_cache_entry() {
        let coordinator = Arc::new(coordinator());
        let calls = Arc::new(AtomicUsize::new(0));
        let options = RequestOptions::default().with_dedupe_window(Duration::from_millis(10));

        let first = {
            let coordinator = Arc::clone(&coordinator);
            let calls = Arc::clone(&calls);
            let options = options.clone();
            tokio::spawn(async move {
                coordinator
                    .run("articles", counting_fetch(calls, Duration::from_millis(500), 1), &options)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = coordinator
            .run(
                "articles",
                counting_fetch(Arc::clone(&calls), Duration::from_millis(100), 2),
                &options,
            )
            .await;
        assert_eq!(second, Ok(2));
        assert_eq!(coordinator.store().get("articles"), Some(json!(2)));

        assert_eq!(first.await.unwrap(), Ok(1));
        assert_eq!(coordinator.store().get("articles"), Some(json!(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget_starts_a_new_request_and_keeps_old_waiters() {
        let coordinator = Arc::new(coordinator());
        let calls = Arc::new(AtomicUsize::new(0));
        let options = RequestOptions::default();

        let retired = {
            let coordinator = Arc::clone(&coordinator);
            let calls = Arc::clone(&calls);
            let options = options.clone();
            tokio::spawn(async move {
                coordinator
                    .run("drafts", counting_fetch(calls, Duration::from_millis(200), 1), &options)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(coordinator.forget("drafts"));
        assert!(!coordinator.forget("drafts"));

        let fresh = coordinator
            .run(
                "drafts",
                counting_fetch(Arc::clone(&calls), Duration::from_millis(200), 2),
                &options,
            )
            .await;

        assert_eq!(retired.await.unwrap(), Ok(1));
        assert_eq!(fresh, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.store().get("drafts"), Some(json!(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget_matching() {
        let coordinator = Arc::new(coordinator());
        let options = RequestOptions::default();

        for key in ["articles:page=1", "articles:page=2", "tags"] {
            let coordinator = Arc::clone(&coordinator);
            let options = options.clone();
            let calls = Arc::new(AtomicUsize::new(0));
            tokio::spawn(async move {
                coordinator
                    .run(key, counting_fetch(calls, Duration::from_millis(100), 1), &options)
                    .await
            });
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let pattern = KeyPattern::new("articles:*").unwrap();
        assert_eq!(coordinator.forget_matching(&pattern), 2);
        assert!(coordinator.is_in_flight("tags"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(coordinator.store().get("articles:page=1"), None);
        assert_eq!(coordinator.store().get("tags"), Some(json!(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_waiter_does_not_cancel_request() {
        let coordinator = Arc::new(coordinator());
        let calls = Arc::new(AtomicUsize::new(0));
        let options = RequestOptions::default();

        let abandoned = {
            let coordinator = Arc::clone(&coordinator);
            let calls = Arc::clone(&calls);
            let options = options.clone();
            tokio::spawn(async move {
                coordinator
                    .run("notifications", counting_fetch(calls, Duration::from_millis(100), 3), &options)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(coordinator.waiters("notifications"), Some(1));
        abandoned.abort();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(coordinator.waiters("notifications"), Some(0));

        let value = coordinator
            .run(
                "notifications",
                counting_fetch(Arc::clone(&calls), Duration::from_millis(100), 4),
                &options,
            )
            .await;

        assert_eq!(value, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.store().get("notifications"), Some(json!(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_rejects_waiters_without_retry() {
        let coordinator = Arc::new(coordinator());
        let calls = Arc::new(AtomicUsize::new(0));
        let options = RequestOptions::default().with_retry(3, Duration::from_millis(10));

        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                coordinator
                    .run("drafts", counting_fetch(calls, Duration::from_millis(100), 1), &options)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(coordinator.cancel("drafts"));

        assert_eq!(waiter.await.unwrap(), Err(QueryError::Cancelled));
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_in_flight("drafts"));
        assert_eq!(coordinator.store().get("drafts"), None);
        assert!(!coordinator.cancel("drafts"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_fetch_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let options = RequestOptions::default().with_retry(3, Duration::from_millis(10));
        let fetch = {
            let calls = Arc::clone(&calls);
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>(QueryError::Cancelled) }
            }
        };

        let result = fetch_with_retry("drafts", &fetch, &options).await;

        assert_eq!(result, Err(QueryError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_joiner_expecting_another_shape_gets_serialization_error() {
        let coordinator = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = RequestOptions::default();

        let (numbers, text) = tokio::join!(
            coordinator.run(
                "tags",
                counting_fetch(Arc::clone(&calls), Duration::from_millis(10), 7),
                &options
            ),
            coordinator.run::<String, _, _>(
                "tags",
                || async { Ok("never fetched".to_string()) },
                &options
            ),
        );

        assert_eq!(numbers, Ok(7));
        assert!(matches!(text, Err(QueryError::Serialization { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
