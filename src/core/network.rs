//! Device-level network status signal.
//!
//! An external collaborator (OS hook, connectivity poller, test) publishes
//! the online/offline fact here; dispatch reads it and the service listens
//! for transitions.

use std::sync::Arc;

use tokio::sync::watch;

/// Shared online/offline flag with transition notifications.
#[derive(Debug, Clone)]
pub struct NetworkStatus {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkStatus {
    /// Create a signal with the given initial state.
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Current state.
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Publish a new state. Returns `true` if it was a transition.
    ///
    /// Subscribers are only woken on transitions.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "Network status changed");
        }
        changed
    }

    /// Receiver that observes transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_online_reports_transitions_only() {
        let status = NetworkStatus::new(true);
        assert!(!status.set_online(true));
        assert!(status.set_online(false));
        assert!(!status.is_online());
        assert!(!status.set_online(false));
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let status = NetworkStatus::new(false);
        let mut rx = status.subscribe();

        status.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
    }

    #[test]
    fn repeated_state_does_not_wake_subscribers() {
        let status = NetworkStatus::new(true);
        let mut rx = status.subscribe();
        let mut changed = tokio_test::task::spawn(rx.changed());

        status.set_online(true);
        tokio_test::assert_pending!(changed.poll());

        status.set_online(false);
        assert!(changed.is_woken());
        tokio_test::assert_ready_ok!(changed.poll());
    }

    #[test]
    fn clones_share_state() {
        let status = NetworkStatus::default();
        let other = status.clone();
        other.set_online(false);
        assert!(!status.is_online());
    }
}
