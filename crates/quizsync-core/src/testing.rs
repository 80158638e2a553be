//! Shared fakes for unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::cache::TtlCache;
use crate::clock::{ClockSync, ManualClock};
use crate::config::SyncConfig;
use crate::coordinator::{CompletedQuiz, SubmissionCoordinator};
use crate::error::RemoteError;
use crate::leaderboard::RankResolver;
use crate::lock::AttemptLedger;
use crate::memory::MemoryStore;
use crate::model::{LeaderboardEntry, Question, SubmitReceipt, SubmitRequest};
use crate::queue::PendingQueue;
use crate::traits::{LeaderboardSource, ResultSink, TimeSource};

/// Remote fake: accumulates scores, fails quizzes listed in `failing`,
/// rejects those in `rejecting`. With `yielding` set, every call yields to
/// the scheduler first, like a real network round trip.
#[derive(Default)]
pub struct FakeRemote {
    pub offline: AtomicBool,
    pub failing: Mutex<HashSet<String>>,
    pub rejecting: Mutex<HashSet<String>>,
    pub scores: Mutex<Vec<(String, i64)>>,
    pub submits: AtomicU32,
    pub top_fetches: AtomicU32,
    pub yielding: AtomicBool,
    pub score_reads: AtomicU32,
}

impl FakeRemote {
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_score(&self, user: &str, score: i64) {
        let mut scores = self.scores.lock().unwrap();
        scores.retain(|(u, _)| u != user);
        scores.push((user.into(), score));
    }

    pub fn score_of(&self, user: &str) -> Option<i64> {
        let scores = self.scores.lock().unwrap();
        scores.iter().find(|(u, _)| u == user).map(|(_, s)| *s)
    }

    async fn round_trip(&self) {
        if self.yielding.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }

    fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    fn offline_error() -> anyhow::Error {
        RemoteError::NetworkError("offline".into()).into()
    }
}

#[async_trait]
impl ResultSink for FakeRemote {
    async fn submit(&self, request: &SubmitRequest) -> anyhow::Result<SubmitReceipt> {
        self.round_trip().await;
        self.submits.fetch_add(1, Ordering::SeqCst);
        if self.is_offline() || self.failing.lock().unwrap().contains(&request.quiz_id) {
            return Err(Self::offline_error());
        }
        if self.rejecting.lock().unwrap().contains(&request.quiz_id) {
            return Err(RemoteError::Rejected("quiz is closed".into()).into());
        }
        let total = self.score_of(&request.user_id).unwrap_or(0) + request.score;
        self.set_score(&request.user_id, total);
        Ok(SubmitReceipt {
            recorded_at_ms: None,
            total_score: Some(total),
        })
    }
}

#[async_trait]
impl LeaderboardSource for FakeRemote {
    async fn top_scores(&self, limit: Option<usize>) -> anyhow::Result<Vec<LeaderboardEntry>> {
        self.round_trip().await;
        if self.is_offline() {
            return Err(Self::offline_error());
        }
        self.top_fetches.fetch_add(1, Ordering::SeqCst);
        let mut scores = self.scores.lock().unwrap().clone();
        scores.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(scores
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|(user_id, score)| LeaderboardEntry {
                full_name: user_id.clone(),
                user_id,
                score,
                training_level: None,
                district: None,
                avatar_url: None,
            })
            .collect())
    }

    async fn user_score(&self, user_id: &str) -> anyhow::Result<Option<i64>> {
        self.round_trip().await;
        self.score_reads.fetch_add(1, Ordering::SeqCst);
        if self.is_offline() {
            return Err(Self::offline_error());
        }
        Ok(self.score_of(user_id))
    }

    async fn count_scores_above(&self, score: i64) -> anyhow::Result<u64> {
        let scores = self.scores.lock().unwrap();
        Ok(scores.iter().filter(|(_, s)| *s > score).count() as u64)
    }
}

/// A time source that is never reachable.
pub struct NoTime;

#[async_trait]
impl TimeSource for NoTime {
    fn name(&self) -> &str {
        "none"
    }

    async fn now_ms(&self) -> anyhow::Result<i64> {
        Err(FakeRemote::offline_error())
    }
}

pub struct Harness {
    pub remote: Arc<FakeRemote>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub coordinator: Arc<SubmissionCoordinator>,
}

/// 2026-01-01T12:00:00Z
pub const NOON: i64 = 1_767_268_800_000;

pub fn harness() -> Harness {
    harness_on(Arc::new(MemoryStore::new()), Arc::new(FakeRemote::default()))
}

/// A coordinator over an existing store and remote, as after a reload.
pub fn harness_on(store: Arc<MemoryStore>, remote: Arc<FakeRemote>) -> Harness {
    let clock = Arc::new(ManualClock::new(NOON));
    let cache = TtlCache::new(store.clone(), clock.clone());
    let sync = Arc::new(ClockSync::new(
        clock.clone(),
        cache.clone(),
        Arc::new(NoTime),
        None,
    ));
    let ranks = Arc::new(RankResolver::new(remote.clone(), cache));
    let coordinator = Arc::new(SubmissionCoordinator::new(
        remote.clone(),
        AttemptLedger::new(store.clone(), Default::default()),
        PendingQueue::new(store.clone()),
        ranks,
        sync,
        SyncConfig::default(),
    ));
    Harness {
        remote,
        store,
        clock,
        coordinator,
    }
}

/// A finished quiz of `total` two-choice questions, `correct` of them right.
pub fn quiz(quiz_id: &str, correct: usize, total: usize) -> CompletedQuiz {
    let questions: Vec<Question> = (0..total)
        .map(|i| Question {
            id: format!("{quiz_id}-{i}"),
            prompt: format!("Question {i}"),
            choices: vec!["yes".into(), "no".into()],
            correct_index: 0,
            explanation: None,
        })
        .collect();
    let answers = questions
        .iter()
        .enumerate()
        .map(|(i, q)| (q.id.clone(), usize::from(i >= correct)))
        .collect();
    CompletedQuiz {
        quiz_id: quiz_id.into(),
        user_id: "u1".into(),
        questions,
        answers,
    }
}
