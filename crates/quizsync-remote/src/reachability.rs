//! Connectivity backed by an HTTP reachability probe.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::watch;

use quizsync_core::traits::Connectivity;

/// Tracks an online flag that the host application updates from platform
/// events, and that `probe` reconciles with a real request.
pub struct HttpReachability {
    probe_url: String,
    client: reqwest::Client,
    online: watch::Sender<bool>,
}

impl HttpReachability {
    pub fn new(probe_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        let (online, _) = watch::channel(true);
        Ok(Self {
            probe_url: probe_url.to_string(),
            client,
            online,
        })
    }

    /// Forward a platform online/offline event.
    pub fn set_online(&self, online: bool) {
        self.online.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
    }
}

#[async_trait]
impl Connectivity for HttpReachability {
    fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    /// Any HTTP response counts as reachable; only transport failures do not.
    async fn probe(&self) -> bool {
        let reachable = match self.client.head(&self.probe_url).send().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(url = %self.probe_url, "reachability probe failed: {e}");
                false
            }
        };
        self.set_online(reachable);
        reachable
    }
}
