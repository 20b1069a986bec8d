//! Host connectivity and visibility state.
//!
//! The host feeds transitions in; the coordinator watches them. Setting a
//! value that did not change wakes nobody.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Shared online/visible flags.
#[derive(Debug, Clone)]
pub struct Connectivity {
    online: Arc<watch::Sender<bool>>,
    visible: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    /// Start in the given connectivity state, visible.
    #[must_use]
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(watch::Sender::new(online)),
            visible: Arc::new(watch::Sender::new(true)),
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        *self.visible.borrow()
    }

    /// Record a connectivity transition. Returns whether the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.online.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
        if changed {
            info!(online, "Connectivity changed");
        }
        changed
    }

    /// Record a foreground/background transition. Returns whether the state changed.
    pub fn set_visible(&self, visible: bool) -> bool {
        self.visible.send_if_modified(|current| {
            let changed = *current != visible;
            *current = visible;
            changed
        })
    }

    #[must_use]
    pub fn subscribe_online(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    #[must_use]
    pub fn subscribe_visible(&self) -> watch::Receiver<bool> {
        self.visible.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_report_changes_only() {
        let connectivity = Connectivity::new(false);
        assert!(!connectivity.is_online());
        assert!(connectivity.set_online(true));
        assert!(!connectivity.set_online(true));
        assert!(connectivity.is_online());

        assert!(connectivity.is_visible());
        assert!(connectivity.set_visible(false));
        assert!(!connectivity.is_visible());
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let connectivity = Connectivity::new(false);
        let mut rx = connectivity.subscribe_online();

        let clone = connectivity.clone();
        clone.set_online(true);

        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
    }
}
