//! Host lifecycle source - focus regained, view visible

use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::LifecycleEvent;

const LIFECYCLE_CHANNEL_CAPACITY: usize = 64;

/// Fans host lifecycle events out to every attached binding
///
/// The host calls [`notify_focus`](Self::notify_focus) or
/// [`notify_visible`](Self::notify_visible); bindings with
/// `refetch_on_window_focus` revalidate in response.
#[derive(Debug, Clone)]
pub struct FocusManager {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl FocusManager {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn notify_focus(&self) {
        self.emit(LifecycleEvent::Focus);
    }

    pub fn notify_visible(&self) {
        self.emit(LifecycleEvent::Visible);
    }

    /// Sends an event, returning how many listeners received it
    pub fn emit(&self, event: LifecycleEvent) -> usize {
        let receivers = self.tx.send(event).unwrap_or(0);
        debug!(event = ?event, receivers, "Lifecycle event");
        receivers
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

impl Default for FocusManager {
    fn default() -> Self {
        Self::new()
    }
}
