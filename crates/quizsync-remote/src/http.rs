//! HTTP client for the quiz backend.
//!
//! Speaks a PostgREST-style API: results are submitted through an RPC
//! endpoint, the leaderboard is a plain table read, and the backend exposes
//! its own clock for skew correction.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use quizsync_core::error::RemoteError;
use quizsync_core::model::{LeaderboardEntry, SubmitReceipt, SubmitRequest};
use quizsync_core::traits::{LeaderboardSource, ResultSink, TimeSource};

pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Client for the backend's submit, leaderboard and server-time endpoints.
pub struct HttpBackend {
    base_url: String,
    api_key: Option<String>,
    access_token: Option<String>,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            access_token,
            timeout_secs: timeout.as_secs(),
            client,
        })
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<reqwest::RequestBuilder, RemoteError> {
        let mut url = reqwest::Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| RemoteError::NetworkError(format!("invalid URL: {e}")))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }

        let mut req = self
            .client
            .request(method, url)
            .header("accept", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header("apikey", key);
        }
        if let Some(token) = self.access_token.as_ref().or(self.api_key.as_ref()) {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        Ok(req)
    }

    /// Send a request and map transport faults and error statuses.
    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout(self.timeout_secs)
            } else {
                RemoteError::NetworkError(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5)
                * 1000;
            return Err(RemoteError::RateLimited {
                retry_after_ms: retry_after,
            });
        }
        if status == 401 || status == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::AuthenticationFailed(error_message(&body)));
        }
        if status == 400 || status == 422 {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Rejected(error_message(&body)));
        }
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::ApiError {
                status,
                message: error_message(&body),
            });
        }
        Ok(response)
    }

    async fn json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RemoteError> {
        response.json().await.map_err(|e| RemoteError::ApiError {
            status: 0,
            message: format!("failed to parse response: {e}"),
        })
    }
}

/// Error body as sent by the backend: `{"message": "..."}` or plain text.
#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

#[derive(Deserialize)]
struct ServerTime {
    epoch_ms: i64,
}

#[derive(Deserialize)]
struct ScoreRow {
    score: i64,
}

#[async_trait]
impl ResultSink for HttpBackend {
    #[instrument(skip(self, request), fields(quiz_id = %request.quiz_id))]
    async fn submit(&self, request: &SubmitRequest) -> anyhow::Result<SubmitReceipt> {
        let req = self
            .request(reqwest::Method::POST, "/rpc/submit_quiz_result", &[])?
            .json(request);

        let response = match self.send(req).await {
            Ok(response) => response,
            // The service already holds this (user, quiz, taken_at) result.
            Err(RemoteError::ApiError { status: 409, .. }) => {
                tracing::debug!("duplicate submission acknowledged");
                return Ok(SubmitReceipt::default());
            }
            Err(e) => return Err(e.into()),
        };

        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::NetworkError(e.to_string()))?;
        if body.trim().is_empty() || body.trim() == "null" {
            return Ok(SubmitReceipt::default());
        }
        let receipt = serde_json::from_str(&body).map_err(|e| RemoteError::ApiError {
            status: 0,
            message: format!("failed to parse receipt: {e}"),
        })?;
        Ok(receipt)
    }
}

#[async_trait]
impl LeaderboardSource for HttpBackend {
    #[instrument(skip(self))]
    async fn top_scores(&self, limit: Option<usize>) -> anyhow::Result<Vec<LeaderboardEntry>> {
        let mut params = vec![("order", "score.desc".to_string())];
        if let Some(limit) = limit {
            params.push(("limit", limit.to_string()));
        }
        let req = self.request(reqwest::Method::GET, "/leaderboard", &params)?;
        let response = self.send(req).await?;
        Ok(Self::json(response).await?)
    }

    #[instrument(skip(self))]
    async fn user_score(&self, user_id: &str) -> anyhow::Result<Option<i64>> {
        let params = [
            ("user_id", format!("eq.{user_id}")),
            ("select", "score".to_string()),
        ];
        let req = self.request(reqwest::Method::GET, "/leaderboard", &params)?;
        let response = self.send(req).await?;
        let rows: Vec<ScoreRow> = Self::json(response).await?;
        Ok(rows.first().map(|r| r.score))
    }

    #[instrument(skip(self))]
    async fn count_scores_above(&self, score: i64) -> anyhow::Result<u64> {
        let params = [
            ("score", format!("gt.{score}")),
            ("select", "score".to_string()),
        ];
        let req = self.request(reqwest::Method::GET, "/leaderboard", &params)?;
        let response = self.send(req).await?;
        let rows: Vec<ScoreRow> = Self::json(response).await?;
        Ok(rows.len() as u64)
    }
}

#[async_trait]
impl TimeSource for HttpBackend {
    fn name(&self) -> &str {
        "backend"
    }

    #[instrument(skip(self))]
    async fn now_ms(&self) -> anyhow::Result<i64> {
        let req = self.request(reqwest::Method::GET, "/rpc/server_time", &[])?;
        let response = self.send(req).await?;
        let time: ServerTime = Self::json(response).await?;
        Ok(time.epoch_ms)
    }
}
