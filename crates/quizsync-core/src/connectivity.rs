//! In-process connectivity signal.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::traits::Connectivity;

/// Connectivity driven by the host application's online/offline events.
///
/// `set_online` forwards a platform event. `set_reachable` sets what
/// `probe` reports, which lets the polling fallback notice a transition
/// whose event never arrived.
pub struct ManualConnectivity {
    online: watch::Sender<bool>,
    reachable: AtomicBool,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self {
            online: tx,
            reachable: AtomicBool::new(online),
        }
    }

    /// Deliver an online/offline event. Also updates reachability.
    pub fn set_online(&self, online: bool) {
        self.reachable.store(online, Ordering::SeqCst);
        self.online.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
    }

    /// Change reachability without emitting an event.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl Connectivity for ManualConnectivity {
    fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    async fn probe(&self) -> bool {
        let reachable = self.reachable.load(Ordering::SeqCst);
        // Reconcile the flag with what the probe saw.
        self.online.send_if_modified(|current| {
            let changed = *current != reachable;
            *current = reachable;
            changed
        });
        reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscribers_once() {
        let conn = ManualConnectivity::new(false);
        let mut rx = conn.subscribe();

        conn.set_online(false);
        assert!(!rx.has_changed().unwrap());

        conn.set_online(true);
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
        assert!(conn.is_online());
    }

    #[tokio::test]
    async fn probe_reconciles_missed_event() {
        let conn = ManualConnectivity::new(false);
        let rx = conn.subscribe();
        conn.set_reachable(true);
        assert!(!conn.is_online());

        assert!(conn.probe().await);
        assert!(conn.is_online());
        assert!(rx.has_changed().unwrap());
    }
}
