//! Query binding - one consumer's stale-while-revalidate view of a key
//!
//! State machine:
//! - Idle → Fresh: a fresh cache entry is served synchronously on attach
//! - Idle → Loading: no fresh entry, the coordinator is asked to fetch
//! - Fresh → Stale: data outlived `stale_time`, a background refresh starts
//! - Stale → Fresh: the refresh succeeded
//! - any → Detached: listeners stop, late results are dropped

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::client::QueryClient;
use super::listeners;
use crate::domain::{Fetcher, QueryData, QueryError, QueryOptions, QueryState};
use crate::infrastructure::subscription::Subscription;

/// Minimum spacing between two focus-triggered refreshes of one binding
pub const FOCUS_THROTTLE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    /// First load or explicit refetch; drives `loading`
    Foreground,
    /// Revalidation; never touches `loading` and never clears data
    Background,
}

struct Target<T> {
    key: String,
    fetcher: Fetcher<T>,
    enabled: bool,
}

#[derive(Default)]
struct Tasks {
    listeners: Vec<JoinHandle<()>>,
    fetches: Vec<JoinHandle<()>>,
    stale_timer: Option<JoinHandle<()>>,
}

impl Tasks {
    fn abort_fetches(&mut self) {
        for handle in self.fetches.drain(..).chain(self.stale_timer.take()) {
            handle.abort();
        }
    }

    fn abort_all(&mut self) {
        self.abort_fetches();
        for handle in self.listeners.drain(..) {
            handle.abort();
        }
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared part of a binding, referenced weakly by its background tasks
pub(crate) struct BindingInner<T> {
    id: Uuid,
    client: QueryClient,
    options: QueryOptions,
    target: Mutex<Target<T>>,
    state: watch::Sender<QueryState<T>>,
    tasks: Mutex<Tasks>,
    attached: AtomicBool,
    /// Bumped whenever in-flight results must be ignored
    epoch: AtomicU64,
    last_focus_refresh: Mutex<Option<Instant>>,
}

/// A consumer's live view of one query
///
/// Created detached by [`QueryClient::query`]; [`attach`](Self::attach)
/// starts loading and listening, dropping the binding detaches it.
pub struct QueryBinding<T: QueryData> {
    inner: Arc<BindingInner<T>>,
}

impl<T: QueryData> std::fmt::Debug for QueryBinding<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBinding")
            .field("id", &self.inner.id)
            .field("key", &self.inner.key())
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl<T: QueryData> QueryBinding<T> {
    pub(crate) fn new(
        client: QueryClient,
        key: String,
        fetcher: Fetcher<T>,
        options: QueryOptions,
    ) -> Self {
        let (state, _) = watch::channel(QueryState::default());
        let enabled = options.enabled;

        Self {
            inner: Arc::new(BindingInner {
                id: Uuid::new_v4(),
                client,
                options,
                target: Mutex::new(Target {
                    key,
                    fetcher,
                    enabled,
                }),
                state,
                tasks: Mutex::new(Tasks::default()),
                attached: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                last_focus_refresh: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn key(&self) -> String {
        self.inner.key()
    }

    pub fn options(&self) -> &QueryOptions {
        &self.inner.options
    }

    pub fn is_attached(&self) -> bool {
        self.inner.attached.load(Ordering::SeqCst)
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.inner.target).enabled
    }

    /// Snapshot of the current state
    pub fn state(&self) -> QueryState<T> {
        self.inner.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<QueryState<T>> {
        self.inner.state.subscribe()
    }

    /// Calls `callback` on every state change until the subscription is dropped
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&QueryState<T>) + Send + Sync + 'static,
    {
        Subscription::watch(self.watch(), callback)
    }

    /// Starts loading and listening; a no-op when already attached
    pub fn attach(&self) {
        if self.inner.attached.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(binding_id = %self.inner.id, key = %self.inner.key(), "Binding attached");
        self.inner.start();
    }

    /// Stops every listener and ignores results still on their way
    ///
    /// Requests already handed to the coordinator keep running for their
    /// other waiters.
    pub fn detach(&self) {
        if !self.inner.attached.swap(false, Ordering::SeqCst) {
            return;
        }

        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.tasks).abort_all();
        debug!(binding_id = %self.inner.id, key = %self.inner.key(), "Binding detached");
    }

    /// Fetches again, showing `loading` while keeping the data already held
    pub fn refetch(&self) {
        if !self.inner.is_active() {
            debug!(binding_id = %self.inner.id, "Refetch ignored, binding inactive");
            return;
        }

        self.inner.fetch(FetchMode::Foreground);
    }

    /// Drops the cached entry and local state so the next read goes through Loading
    pub fn invalidate(&self) {
        let key = self.inner.key();
        self.inner.client.coordinator().forget(&key);
        self.inner.client.store().delete(&key);
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.tasks).abort_fetches();
        self.inner.state.send_replace(QueryState::default());

        info!(binding_id = %self.inner.id, key = %key, "Query invalidated");

        if self.inner.is_active() {
            self.inner.load(&key);
        }
    }

    /// Switches to another key, e.g. when the parameters it depends on change
    pub fn rebind(&self, key: impl Into<String>, fetcher: Fetcher<T>) {
        let key = key.into();
        let previous = {
            let mut target = lock(&self.inner.target);
            target.fetcher = fetcher;
            std::mem::replace(&mut target.key, key.clone())
        };

        if previous == key {
            return;
        }

        debug!(binding_id = %self.inner.id, from = %previous, to = %key, "Binding rebound");
        self.inner.reset();

        if self.is_attached() {
            self.inner.start();
        }
    }

    /// Disabled bindings never fetch; enabling an attached binding loads it
    pub fn set_enabled(&self, enabled: bool) {
        let was_enabled = std::mem::replace(&mut lock(&self.inner.target).enabled, enabled);
        if was_enabled == enabled {
            return;
        }

        if enabled {
            if self.is_attached() {
                self.inner.start();
            }
        } else {
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            lock(&self.inner.tasks).abort_all();
            self.inner.state.send_modify(|state| state.loading = false);
        }
    }
}

impl<T: QueryData> Drop for QueryBinding<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

impl<T: QueryData> BindingInner<T> {
    pub(super) fn id(&self) -> Uuid {
        self.id
    }

    pub(super) fn client(&self) -> &QueryClient {
        &self.client
    }

    pub(super) fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub(super) fn key(&self) -> String {
        lock(&self.target).key.clone()
    }

    fn is_active(&self) -> bool {
        self.attached.load(Ordering::SeqCst) && lock(&self.target).enabled
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.attached.load(Ordering::SeqCst) && self.epoch.load(Ordering::SeqCst) == epoch
    }

    pub(super) fn add_listeners(&self, handles: Vec<JoinHandle<()>>) {
        lock(&self.tasks).listeners.extend(handles);
    }

    fn reset(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        lock(&self.tasks).abort_all();
        self.state.send_replace(QueryState::default());
    }

    fn start(self: &Arc<Self>) {
        if !self.is_active() {
            debug!(binding_id = %self.id, "Binding disabled, not fetching");
            return;
        }

        let key = self.key();
        self.load(&key);
        listeners::spawn(self, &key);
    }

    /// Serves a fresh cache entry or starts a foreground fetch
    fn load(self: &Arc<Self>, key: &str) {
        let store = self.client.store();

        let Some(data) = store.get_as::<T>(key) else {
            self.fetch(FetchMode::Foreground);
            return;
        };

        let age = store.age(key).unwrap_or_default();
        let is_stale = self.options.is_stale(age);

        self.state.send_modify(|state| {
            state.data = Some(data);
            state.loading = false;
            state.error = None;
            state.is_stale = is_stale;
            state.updated_at = Instant::now().checked_sub(age);
        });

        debug!(binding_id = %self.id, key = %key, stale = is_stale, "Served from cache");

        if is_stale {
            self.fetch(FetchMode::Background);
        } else {
            self.schedule_stale_timer(self.options.effective_stale_time().saturating_sub(age));
        }
    }

    fn fetch(self: &Arc<Self>, mode: FetchMode) {
        let (key, fetcher) = {
            let target = lock(&self.target);
            (target.key.clone(), Arc::clone(&target.fetcher))
        };
        let epoch = self.epoch.load(Ordering::SeqCst);

        if mode == FetchMode::Foreground {
            self.state.send_modify(|state| state.loading = true);
        }

        let coordinator = Arc::clone(self.client.coordinator());
        let options = self.options.request.clone();
        let binding = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let result = coordinator.run(&key, move || fetcher(), &options).await;
            if let Some(binding) = binding.upgrade() {
                binding.apply(epoch, mode, result);
            }
        });

        let mut tasks = lock(&self.tasks);
        tasks.fetches.retain(|handle| !handle.is_finished());
        tasks.fetches.push(handle);
    }

    fn apply(self: &Arc<Self>, epoch: u64, mode: FetchMode, result: Result<T, QueryError>) {
        if !self.is_current(epoch) {
            debug!(binding_id = %self.id, "Ignoring result of a superseded fetch");
            return;
        }

        match result {
            Ok(data) => {
                let stale_time = self.options.effective_stale_time();
                self.state.send_modify(|state| {
                    state.data = Some(data);
                    if mode == FetchMode::Foreground {
                        state.loading = false;
                    }
                    state.error = None;
                    state.is_stale = stale_time.is_zero();
                    state.updated_at = Some(Instant::now());
                });
                self.schedule_stale_timer(stale_time);
            }
            Err(QueryError::Cancelled) => {
                debug!(binding_id = %self.id, "Fetch cancelled, data and error unchanged");
                if mode == FetchMode::Foreground {
                    self.state.send_modify(|state| state.loading = false);
                }
            }
            Err(error) => {
                match mode {
                    FetchMode::Background => warn!(
                        binding_id = %self.id,
                        error = %error,
                        "Background refresh failed, keeping last data"
                    ),
                    FetchMode::Foreground => {
                        warn!(binding_id = %self.id, error = %error, "Query failed")
                    }
                }
                self.state.send_modify(|state| {
                    if mode == FetchMode::Foreground {
                        state.loading = false;
                    }
                    state.error = Some(error);
                });
            }
        }
    }

    fn schedule_stale_timer(self: &Arc<Self>, delay: Duration) {
        if self.options.effective_stale_time().is_zero() {
            return;
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let binding = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(binding) = binding.upgrade() {
                binding.on_stale(epoch);
            }
        });

        if let Some(previous) = lock(&self.tasks).stale_timer.replace(handle) {
            previous.abort();
        }
    }

    fn on_stale(self: &Arc<Self>, epoch: u64) {
        if !self.is_current(epoch) {
            return;
        }

        self.state.send_modify(|state| state.is_stale = true);
        self.refresh("stale");
    }

    /// Starts a background refresh if the binding is attached and enabled
    pub(super) fn refresh(self: &Arc<Self>, trigger: &'static str) {
        if !self.is_active() {
            return;
        }

        debug!(binding_id = %self.id, trigger, "Background refresh");
        self.fetch(FetchMode::Background);
    }

    pub(super) fn on_focus(self: &Arc<Self>) {
        let now = Instant::now();
        {
            let mut last = lock(&self.last_focus_refresh);
            if last.is_some_and(|at| now.saturating_duration_since(at) < FOCUS_THROTTLE) {
                debug!(binding_id = %self.id, "Focus refresh throttled");
                return;
            }
            *last = Some(now);
        }

        self.refresh("focus");
    }

    pub(super) fn on_invalidated(self: &Arc<Self>) {
        if !self.is_active() {
            return;
        }

        self.state.send_modify(|state| state.is_stale = true);
        self.refresh("invalidated");
    }
}
