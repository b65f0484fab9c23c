//! Mutation binding - one-shot write actions with observable state
//!
//! Every call runs the action exactly once: no dedup, no cache, no retry.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::FutureExt;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{FetchFuture, MutationState, QueryError};
use crate::infrastructure::observability::record_mutation;
use crate::infrastructure::subscription::Subscription;

/// Caller-supplied write action taking the mutation variables
pub type MutationFn<V, T> = Arc<dyn Fn(V) -> FetchFuture<T> + Send + Sync>;

/// Wraps an async closure into a [`MutationFn`]
pub fn mutation_fn<V, T, F, Fut>(f: F) -> MutationFn<V, T>
where
    F: Fn(V) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
{
    Arc::new(move |vars| f(vars).boxed())
}

type SuccessCallback<V, T> = Arc<dyn Fn(&T, &V) + Send + Sync>;
type ErrorCallback<V> = Arc<dyn Fn(&QueryError, &V) + Send + Sync>;
type SettledCallback<V, T> = Arc<dyn Fn(Option<&T>, Option<&QueryError>, &V) + Send + Sync>;

/// Callbacks fired after each invocation settles
///
/// `on_success` or `on_error` runs first, then `on_settled`.
pub struct MutationOptions<V, T> {
    on_success: Option<SuccessCallback<V, T>>,
    on_error: Option<ErrorCallback<V>>,
    on_settled: Option<SettledCallback<V, T>>,
}

impl<V, T> Default for MutationOptions<V, T> {
    fn default() -> Self {
        Self {
            on_success: None,
            on_error: None,
            on_settled: None,
        }
    }
}

impl<V, T> Clone for MutationOptions<V, T> {
    fn clone(&self) -> Self {
        Self {
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            on_settled: self.on_settled.clone(),
        }
    }
}

impl<V, T> MutationOptions<V, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success(mut self, callback: impl Fn(&T, &V) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&QueryError, &V) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn on_settled(
        mut self,
        callback: impl Fn(Option<&T>, Option<&QueryError>, &V) + Send + Sync + 'static,
    ) -> Self {
        self.on_settled = Some(Arc::new(callback));
        self
    }
}

struct MutationInner<V, T> {
    id: Uuid,
    action: MutationFn<V, T>,
    options: MutationOptions<V, T>,
    state: watch::Sender<MutationState<T>>,
    detached: AtomicBool,
    /// Number of the most recent invocation; only it may publish state
    latest: AtomicU64,
}

/// Observable wrapper around a write action; dropping it detaches it
pub struct MutationBinding<V, T> {
    inner: Arc<MutationInner<V, T>>,
}

impl<V, T> std::fmt::Debug for MutationBinding<V, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationBinding")
            .field("id", &self.inner.id)
            .field("detached", &self.inner.detached.load(Ordering::SeqCst))
            .finish()
    }
}

impl<V, T> MutationBinding<V, T>
where
    V: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new(action: MutationFn<V, T>) -> Self {
        Self::with_options(action, MutationOptions::default())
    }

    pub fn with_options(action: MutationFn<V, T>, options: MutationOptions<V, T>) -> Self {
        let (state, _) = watch::channel(MutationState::default());

        Self {
            inner: Arc::new(MutationInner {
                id: Uuid::new_v4(),
                action,
                options,
                state,
                detached: AtomicBool::new(false),
                latest: AtomicU64::new(0),
            }),
        }
    }

    /// Runs the action in the background; observe the outcome through state or callbacks
    pub fn mutate(&self, vars: V) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            // Outcome already published and passed to the callbacks
            let _ = inner.execute(vars).await;
        });
    }

    /// Runs the action and returns its outcome
    pub async fn mutate_async(&self, vars: V) -> Result<T, QueryError> {
        self.inner.execute(vars).await
    }

    /// Clears state; calls still running are not affected
    pub fn reset(&self) {
        if !self.is_detached() {
            self.inner.state.send_replace(MutationState::default());
        }
    }

    /// Stops state updates; callbacks of calls still running keep firing
    pub fn detach(&self) {
        if !self.inner.detached.swap(true, Ordering::SeqCst) {
            debug!(mutation_id = %self.inner.id, "Mutation detached");
        }
    }

    pub fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> MutationState<T> {
        self.inner.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<MutationState<T>> {
        self.inner.state.subscribe()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&MutationState<T>) + Send + Sync + 'static,
    {
        Subscription::watch(self.watch(), callback)
    }
}

impl<V, T> Drop for MutationBinding<V, T> {
    fn drop(&mut self) {
        self.inner.detached.store(true, Ordering::SeqCst);
    }
}

impl<V, T> MutationInner<V, T>
where
    V: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    async fn execute(&self, vars: V) -> Result<T, QueryError> {
        let call = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        self.publish(call, MutationState::started());

        let result = (self.action)(vars.clone()).await;

        match &result {
            Ok(data) => {
                record_mutation(true);
                self.publish(
                    call,
                    MutationState {
                        data: Some(data.clone()),
                        loading: false,
                        error: None,
                    },
                );

                if let Some(callback) = &self.options.on_success {
                    callback(data, &vars);
                }
                if let Some(callback) = &self.options.on_settled {
                    callback(Some(data), None, &vars);
                }
            }
            Err(QueryError::Cancelled) => {
                debug!(mutation_id = %self.id, "Mutation cancelled, no callbacks");
                self.publish(call, MutationState::default());
            }
            Err(error) => {
                record_mutation(false);
                warn!(mutation_id = %self.id, error = %error, "Mutation failed");
                self.publish(
                    call,
                    MutationState {
                        data: None,
                        loading: false,
                        error: Some(error.clone()),
                    },
                );

                if let Some(callback) = &self.options.on_error {
                    callback(error, &vars);
                }
                if let Some(callback) = &self.options.on_settled {
                    callback(None, Some(error), &vars);
                }
            }
        }

        result
    }

    fn publish(&self, call: u64, state: MutationState<T>) {
        if self.detached.load(Ordering::SeqCst) || self.latest.load(Ordering::SeqCst) != call {
            return;
        }
        self.state.send_replace(state);
    }
}
