//! Public time service used when the backend clock is unreachable.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use tracing::instrument;

use quizsync_core::error::RemoteError;
use quizsync_core::traits::TimeSource;

pub const DEFAULT_PUBLIC_TIME_URL: &str = "https://worldtimeapi.org/api/timezone/Etc/UTC";

/// Reads the current time from a worldtimeapi-compatible endpoint.
pub struct WorldTimeSource {
    url: String,
    client: reqwest::Client,
}

impl WorldTimeSource {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

#[derive(Deserialize)]
struct WorldTime {
    #[serde(default)]
    utc_datetime: Option<String>,
    #[serde(default)]
    datetime: Option<String>,
    #[serde(default)]
    unixtime: Option<i64>,
}

impl WorldTime {
    /// Millisecond timestamp, preferring the RFC 3339 fields for their
    /// sub-second precision.
    fn epoch_ms(&self) -> Option<i64> {
        self.utc_datetime
            .iter()
            .chain(self.datetime.iter())
            .find_map(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.timestamp_millis())
            .or_else(|| self.unixtime.map(|s| s * 1000))
    }
}

#[async_trait]
impl TimeSource for WorldTimeSource {
    fn name(&self) -> &str {
        "public"
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn now_ms(&self) -> anyhow::Result<i64> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| RemoteError::NetworkError(e.to_string()))?;

        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::ApiError {
                status,
                message: body,
            }
            .into());
        }

        let time: WorldTime = response.json().await.map_err(|e| RemoteError::ApiError {
            status: 0,
            message: format!("failed to parse response: {e}"),
        })?;
        time.epoch_ms()
            .ok_or_else(|| anyhow::anyhow!("time response carried no timestamp"))
    }
}
