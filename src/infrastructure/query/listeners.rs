//! Background listeners that turn outside events into binding refreshes
//!
//! Each listener holds a weak reference and exits once its binding is gone.
//! Receivers are subscribed before spawning so an event sent right after
//! `attach` is not missed.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use super::binding::BindingInner;
use crate::domain::QueryData;

pub(super) fn spawn<T: QueryData>(binding: &Arc<BindingInner<T>>, key: &str) {
    let options = binding.options();
    let mut handles = Vec::with_capacity(4);

    if options.refetch_on_window_focus {
        handles.push(focus_listener(binding));
    }
    if let Some(interval) = options.refetch_interval {
        handles.push(interval_poller(binding, interval));
    }
    if options.request.preload {
        handles.push(preload_listener(binding, key.to_string()));
    }
    handles.push(invalidation_listener(binding, key.to_string()));

    debug!(binding_id = %binding.id(), key = %key, listeners = handles.len(), "Listeners started");
    binding.add_listeners(handles);
}

/// Runs `on_event` for every message until the channel closes or the binding is dropped
fn listen<M, T, F>(
    mut rx: broadcast::Receiver<M>,
    binding: Weak<BindingInner<T>>,
    on_event: F,
) -> JoinHandle<()>
where
    M: Clone + Send + 'static,
    T: QueryData,
    F: Fn(&Arc<BindingInner<T>>, M) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let message = match rx.recv().await {
                Ok(message) => message,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Listener lagged behind");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            match binding.upgrade() {
                Some(binding) => on_event(&binding, message),
                None => break,
            }
        }
    })
}

fn focus_listener<T: QueryData>(binding: &Arc<BindingInner<T>>) -> JoinHandle<()> {
    let rx = binding.client().focus_manager().subscribe();
    listen(rx, Arc::downgrade(binding), |binding, _| binding.on_focus())
}

fn preload_listener<T: QueryData>(binding: &Arc<BindingInner<T>>, key: String) -> JoinHandle<()> {
    let rx = binding.client().store().subscribe_preload();
    listen(rx, Arc::downgrade(binding), move |binding, signal| {
        if signal.key == key {
            binding.refresh("preload");
        }
    })
}

fn invalidation_listener<T: QueryData>(
    binding: &Arc<BindingInner<T>>,
    key: String,
) -> JoinHandle<()> {
    let rx = binding.client().subscribe_invalidations();
    listen(rx, Arc::downgrade(binding), move |binding, pattern| {
        if pattern.matches(&key) {
            binding.on_invalidated();
        }
    })
}

fn interval_poller<T: QueryData>(
    binding: &Arc<BindingInner<T>>,
    interval: Duration,
) -> JoinHandle<()> {
    let binding = Arc::downgrade(binding);

    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match binding.upgrade() {
                Some(binding) => binding.refresh("interval"),
                None => break,
            }
        }
    })
}
