//! Dedicated single-consumer requests
//!
//! Unlike a [`QueryBinding`](super::QueryBinding), a direct request owns its
//! operation outright: nothing is shared or cached, and tearing the handle
//! down aborts the work.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::{QueryError, QueryState, RequestOptions};
use crate::infrastructure::coordinator::fetch_with_retry;
use crate::infrastructure::subscription::Subscription;

/// Handle to one dedicated fetch; dropping it cancels the fetch
pub struct DirectRequest<T> {
    state: Arc<watch::Sender<QueryState<T>>>,
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl<T> std::fmt::Debug for DirectRequest<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectRequest")
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

impl<T> DirectRequest<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Starts `fetch` once, with no retry
    pub fn spawn<F, Fut>(fetch: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let (tx, _) = watch::channel(QueryState {
            loading: true,
            ..QueryState::default()
        });
        let state = Arc::new(tx);
        let cancelled = Arc::new(AtomicBool::new(false));

        let handle = {
            let state = Arc::clone(&state);
            let cancelled = Arc::clone(&cancelled);
            tokio::spawn(async move {
                let result = fetch().await;
                settle(&state, &cancelled, result);
            })
        };

        Self {
            state,
            cancelled,
            handle,
        }
    }

    /// Starts `fetch` with the retry policy of `options`; `key` only labels logs
    pub fn spawn_with_retry<F, Fut>(key: impl Into<String>, fetch: F, options: RequestOptions) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let key = key.into();
        Self::spawn(move || async move { fetch_with_retry(&key, &fetch, &options).await })
    }

    pub fn state(&self) -> QueryState<T> {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<QueryState<T>> {
        self.state.subscribe()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&QueryState<T>) + Send + Sync + 'static,
    {
        Subscription::watch(self.watch(), callback)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> DirectRequest<T> {
    /// Aborts the fetch; a result that still arrives is discarded
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.handle.abort();
            debug!("Direct request cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl<T> Drop for DirectRequest<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn settle<T>(
    state: &watch::Sender<QueryState<T>>,
    cancelled: &AtomicBool,
    result: Result<T, QueryError>,
) {
    if cancelled.load(Ordering::SeqCst) {
        debug!("Discarding result of a cancelled direct request");
        return;
    }

    match result {
        Ok(data) => state.send_modify(|state| {
            state.data = Some(data);
            state.loading = false;
            state.error = None;
            state.updated_at = Some(Instant::now());
        }),
        Err(QueryError::Cancelled) => {
            debug!("Direct request reported cancellation, data and error unchanged");
            state.send_modify(|state| state.loading = false);
        }
        Err(error) => state.send_modify(|state| {
            state.loading = false;
            state.error = Some(error);
        }),
    }
}
