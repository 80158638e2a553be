//! Background task that decides when to drain the pending queue.
//!
//! One consumer, several producers: connectivity transitions, the fallback
//! poll, the startup check and manual "retry now" requests all funnel into
//! [`SubmissionCoordinator::drain`] from a single task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::coordinator::{DrainReport, SubmissionCoordinator};
use crate::traits::Connectivity;

/// Why a drain was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainReason {
    Startup,
    Reconnected,
    Poll,
    Manual,
}

enum TriggerCmd {
    RetryNow {
        resp: oneshot::Sender<Option<DrainReport>>,
    },
    Shutdown,
}

/// Handle to the drain task. Dropping it stops the task.
pub struct QueueDrainTrigger {
    tx: mpsc::Sender<TriggerCmd>,
    handle: Option<JoinHandle<()>>,
}

impl QueueDrainTrigger {
    /// Start the drain task on the current runtime.
    pub fn spawn(
        coordinator: Arc<SubmissionCoordinator>,
        connectivity: Arc<dyn Connectivity>,
        poll_interval: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(run(coordinator, connectivity, poll_interval, rx));
        Self {
            tx,
            handle: Some(handle),
        }
    }

    /// Drain now and wait for the result. `None` if a drain was already
    /// running or the task has stopped.
    pub async fn retry_now(&self) -> Option<DrainReport> {
        let (resp, rx) = oneshot::channel();
        self.tx.send(TriggerCmd::RetryNow { resp }).await.ok()?;
        rx.await.ok().flatten()
    }

    /// Stop the task and wait for it to exit. An in-flight drain finishes
    /// first.
    pub async fn shutdown(mut self) {
        let _ = self.tx.send(TriggerCmd::Shutdown).await;
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!("drain task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for QueueDrainTrigger {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run(
    coordinator: Arc<SubmissionCoordinator>,
    connectivity: Arc<dyn Connectivity>,
    poll_interval: Duration,
    mut rx: mpsc::Receiver<TriggerCmd>,
) {
    let mut online_rx = connectivity.subscribe();
    let mut was_online = *online_rx.borrow_and_update();
    let mut events_open = true;

    if was_online && !coordinator.queue().is_empty() {
        drain(&coordinator, DrainReason::Startup).await;
    }

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(TriggerCmd::RetryNow { resp }) => {
                    let report = drain(&coordinator, DrainReason::Manual).await;
                    let _ = resp.send(report);
                }
                Some(TriggerCmd::Shutdown) | None => break,
            },

            changed = online_rx.changed(), if events_open => {
                if changed.is_err() {
                    tracing::debug!("connectivity events closed, polling only");
                    events_open = false;
                    continue;
                }
                let online = *online_rx.borrow_and_update();
                if online && !was_online {
                    drain(&coordinator, DrainReason::Reconnected).await;
                }
                was_online = online;
            }

            _ = ticker.tick() => {
                if coordinator.queue().is_empty() {
                    continue;
                }
                let reachable = connectivity.probe().await;
                // The probe may have flipped the flag; that change is handled here.
                online_rx.borrow_and_update();
                was_online = reachable;
                if reachable {
                    drain(&coordinator, DrainReason::Poll).await;
                }
            }
        }
    }

    tracing::debug!("drain trigger stopped");
}

async fn drain(coordinator: &SubmissionCoordinator, reason: DrainReason) -> Option<DrainReport> {
    tracing::debug!(?reason, "drain triggered");
    coordinator.drain().await
}
