//! Mock backend for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use quizsync_core::error::RemoteError;
use quizsync_core::model::{LeaderboardEntry, SubmitReceipt, SubmitRequest};
use quizsync_core::traits::{LeaderboardSource, ResultSink, TimeSource};

/// Scripted result of one submit call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    Accept,
    /// Fail with a network error.
    Transient,
    /// Fail with a validation rejection carrying this message.
    Reject(String),
}

/// An in-memory backend for exercising the engine without a server.
///
/// Submits add to the user's total. Calls fail while offline; otherwise the
/// next scripted outcome (if any) decides the result of a submit.
pub struct MockBackend {
    online: AtomicBool,
    script: Mutex<VecDeque<MockOutcome>>,
    scores: Mutex<HashMap<String, i64>>,
    server_time_ms: Mutex<Option<i64>>,
    submit_calls: AtomicU32,
    top_fetches: AtomicU32,
    last_request: Mutex<Option<SubmitRequest>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            script: Mutex::new(VecDeque::new()),
            scores: Mutex::new(HashMap::new()),
            server_time_ms: Mutex::new(None),
            submit_calls: AtomicU32::new(0),
            top_fetches: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Queue outcomes for the next submit calls, in order.
    pub fn script(&self, outcomes: impl IntoIterator<Item = MockOutcome>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    pub fn set_score(&self, user_id: &str, score: i64) {
        self.scores.lock().unwrap().insert(user_id.to_string(), score);
    }

    pub fn score_of(&self, user_id: &str) -> Option<i64> {
        self.scores.lock().unwrap().get(user_id).copied()
    }

    /// Fix the time reported by the server clock endpoint.
    pub fn set_server_time(&self, epoch_ms: Option<i64>) {
        *self.server_time_ms.lock().unwrap() = epoch_ms;
    }

    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    /// Number of leaderboard list reads, i.e. top-N refreshes.
    pub fn top_fetches(&self) -> u32 {
        self.top_fetches.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<SubmitRequest> {
        self.last_request.lock().unwrap().clone()
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::NetworkError("network unreachable".into()))
        }
    }
}

#[async_trait]
impl ResultSink for MockBackend {
    async fn submit(&self, request: &SubmitRequest) -> anyhow::Result<SubmitReceipt> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        self.check_online()?;

        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(MockOutcome::Accept);
        match outcome {
            MockOutcome::Accept => {}
            MockOutcome::Transient => {
                return Err(RemoteError::ApiError {
                    status: 503,
                    message: "service unavailable".into(),
                }
                .into())
            }
            MockOutcome::Reject(message) => return Err(RemoteError::Rejected(message).into()),
        }

        let mut scores = self.scores.lock().unwrap();
        let total = scores.entry(request.user_id.clone()).or_insert(0);
        *total += request.score;
        Ok(SubmitReceipt {
            recorded_at_ms: None,
            total_score: Some(*total),
        })
    }
}

#[async_trait]
impl LeaderboardSource for MockBackend {
    async fn top_scores(&self, limit: Option<usize>) -> anyhow::Result<Vec<LeaderboardEntry>> {
        self.check_online()?;
        self.top_fetches.fetch_add(1, Ordering::SeqCst);

        let mut rows: Vec<(String, i64)> = self
            .scores
            .lock()
            .unwrap()
            .iter()
            .map(|(u, s)| (u.clone(), *s))
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(rows
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|(user_id, score)| LeaderboardEntry {
                full_name: format!("User {user_id}"),
                user_id,
                score,
                training_level: None,
                district: None,
                avatar_url: None,
            })
            .collect())
    }

    async fn user_score(&self, user_id: &str) -> anyhow::Result<Option<i64>> {
        self.check_online()?;
        Ok(self.score_of(user_id))
    }

    async fn count_scores_above(&self, score: i64) -> anyhow::Result<u64> {
        self.check_online()?;
        let scores = self.scores.lock().unwrap();
        Ok(scores.values().filter(|&&s| s > score).count() as u64)
    }
}

#[async_trait]
impl TimeSource for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn now_ms(&self) -> anyhow::Result<i64> {
        self.check_online()?;
        let time = *self.server_time_ms.lock().unwrap();
        time.ok_or_else(|| anyhow::anyhow!("server time not configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizsync_core::error::is_permanent;

    fn request(user: &str, score: i64) -> SubmitRequest {
        SubmitRequest {
            quiz_id: "q".into(),
            user_id: user.into(),
            score,
            penalty: 0,
            taken_at_ms: 0,
        }
    }

    #[tokio::test]
    async fn submits_accumulate() {
        let backend = MockBackend::new();
        backend.submit(&request("u1", 30)).await.unwrap();
        let receipt = backend.submit(&request("u1", 20)).await.unwrap();
        assert_eq!(receipt.total_score, Some(50));
        assert_eq!(backend.submit_calls(), 2);
        assert_eq!(backend.last_request().unwrap().score, 20);
    }

    #[tokio::test]
    async fn scripted_outcomes_apply_in_order() {
        let backend = MockBackend::new();
        backend.script([
            MockOutcome::Transient,
            MockOutcome::Reject("closed".into()),
        ]);

        let first = backend.submit(&request("u1", 10)).await.unwrap_err();
        assert!(!is_permanent(&first));
        let second = backend.submit(&request("u1", 10)).await.unwrap_err();
        assert!(is_permanent(&second));
        backend.submit(&request("u1", 10)).await.unwrap();
        assert_eq!(backend.score_of("u1"), Some(10));
    }

    #[tokio::test]
    async fn offline_fails_every_call() {
        let backend = MockBackend::new();
        backend.set_online(false);
        assert!(backend.submit(&request("u1", 10)).await.is_err());
        assert!(backend.top_scores(Some(5)).await.is_err());
        assert!(backend.now_ms().await.is_err());
        assert_eq!(backend.top_fetches(), 0);
    }

    #[tokio::test]
    async fn ranking_orders_by_score() {
        let backend = MockBackend::new();
        backend.set_score("a", 100);
        backend.set_score("b", 300);
        backend.set_score("c", 200);
        let top = backend.top_scores(Some(2)).await.unwrap();
        assert_eq!(top[0].user_id, "b");
        assert_eq!(top[1].user_id, "c");
        assert_eq!(backend.count_scores_above(150).await.unwrap(), 2);
    }
}
