//! Callback subscriptions over `watch` channels

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle returned by `subscribe`; dropping it unsubscribes
#[derive(Debug)]
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    /// Calls `callback` with every state published after this point
    pub(crate) fn watch<S, F>(mut rx: watch::Receiver<S>, callback: F) -> Self
    where
        S: Clone + Send + Sync + 'static,
        F: Fn(&S) + Send + Sync + 'static,
    {
        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                callback(&state);
            }
        });

        Self { handle }
    }

    pub fn unsubscribe(self) {}

    /// False once the publisher is gone or the subscription was aborted
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
