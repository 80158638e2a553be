//! Engine assembly.
//!
//! Wires the injected capabilities into the cache, clock synchronizer,
//! ledger, queue, rank resolver and coordinator, and owns the drain
//! trigger's lifetime.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;

use crate::bank::QuizBank;
use crate::cache::TtlCache;
use crate::clock::ClockSync;
use crate::config::SyncConfig;
use crate::coordinator::{
    CompletedQuiz, DrainReport, SubmissionCoordinator, SubmissionOutcome, SyncStatus,
};
use crate::error::{QuizError, SubmitError};
use crate::leaderboard::RankResolver;
use crate::lock::{AttemptLedger, LockStatus};
use crate::model::{LeaderboardEntry, Question, QuizAttemptRecord, RankInfo};
use crate::queue::PendingQueue;
use crate::randomizer::QuizRandomizer;
use crate::traits::{
    Clock, Connectivity, LeaderboardSource, PersistentStore, ResultSink, TimeSource,
};
use crate::trigger::QueueDrainTrigger;

/// The capabilities an engine is built from.
pub struct EngineParts {
    pub store: Arc<dyn PersistentStore>,
    pub clock: Arc<dyn Clock>,
    pub sink: Arc<dyn ResultSink>,
    pub leaderboard: Arc<dyn LeaderboardSource>,
    /// The backend's own clock.
    pub primary_time: Arc<dyn TimeSource>,
    /// Public fallback used when the backend clock is unreachable.
    pub fallback_time: Option<Arc<dyn TimeSource>>,
    pub connectivity: Arc<dyn Connectivity>,
}

/// Facade over the quiz scoring and sync components.
pub struct SyncEngine {
    config: SyncConfig,
    cache: TtlCache,
    clock: Arc<ClockSync>,
    ranks: Arc<RankResolver>,
    coordinator: Arc<SubmissionCoordinator>,
    randomizer: QuizRandomizer,
    connectivity: Arc<dyn Connectivity>,
    trigger: Option<QueueDrainTrigger>,
}

impl SyncEngine {
    pub fn new(parts: EngineParts, config: SyncConfig) -> Self {
        let cache = TtlCache::with_namespace(
            parts.store.clone(),
            parts.clock.clone(),
            config.cache_namespace.clone(),
        );
        let clock = Arc::new(
            ClockSync::new(
                parts.clock,
                cache.clone(),
                parts.primary_time,
                parts.fallback_time,
            )
            .with_ttl(config.clock_offset_ttl()),
        );
        let ranks = Arc::new(
            RankResolver::new(parts.leaderboard, cache.clone())
                .with_ttls(config.leaderboard_ttl(), config.full_leaderboard_ttl()),
        );
        let ledger = AttemptLedger::new(parts.store.clone(), config.lock_window)
            .with_utc_offset(config.lock_utc_offset_minutes);
        let coordinator = Arc::new(SubmissionCoordinator::new(
            parts.sink,
            ledger,
            PendingQueue::new(parts.store),
            ranks.clone(),
            clock.clone(),
            config.clone(),
        ));

        Self {
            randomizer: QuizRandomizer::new(config.shuffle_delay()),
            config,
            cache,
            clock,
            ranks,
            coordinator,
            connectivity: parts.connectivity,
            trigger: None,
        }
    }

    /// Synchronize the clock and start background draining.
    ///
    /// Calling `start` on a running engine does nothing.
    pub async fn start(&mut self) {
        if self.trigger.is_some() {
            return;
        }
        let offset_ms = self.clock.offset_ms().await;
        tracing::info!(offset_ms, queued = self.coordinator.queue().len(), "sync engine started");
        self.trigger = Some(QueueDrainTrigger::spawn(
            self.coordinator.clone(),
            self.connectivity.clone(),
            self.config.poll_interval(),
        ));
    }

    /// Stop background draining. Pending entries stay queued.
    pub async fn shutdown(&mut self) {
        if let Some(trigger) = self.trigger.take() {
            trigger.shutdown().await;
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<SubmissionCoordinator> {
        &self.coordinator
    }

    pub fn corrected_now_ms(&self) -> i64 {
        self.clock.corrected_now_ms()
    }

    /// Force a clock re-synchronization.
    pub async fn sync_clock(&self) -> i64 {
        self.clock.refresh().await
    }

    /// Build a shuffled attempt from `bank`.
    pub async fn prepare_quiz(
        &self,
        bank: &QuizBank,
        count: usize,
    ) -> Result<Vec<Question>, QuizError> {
        self.randomizer.prepare(&bank.questions, count).await
    }

    pub async fn submit(&self, quiz: CompletedQuiz) -> Result<SubmissionOutcome, SubmitError> {
        self.coordinator.submit(quiz).await
    }

    /// The "retry now" action.
    pub async fn retry_now(&self) -> Option<DrainReport> {
        match &self.trigger {
            Some(trigger) => trigger.retry_now().await,
            None => self.coordinator.drain().await,
        }
    }

    pub fn lock_status(&self, user_id: &str, quiz_id: &str) -> LockStatus {
        self.coordinator.lock_status(user_id, quiz_id)
    }

    pub fn can_attempt(&self, user_id: &str, quiz_id: &str) -> bool {
        self.coordinator.can_attempt(user_id, quiz_id)
    }

    /// The last attempt at `quiz_id`, for review.
    pub fn review(&self, quiz_id: &str) -> Option<QuizAttemptRecord> {
        self.coordinator.ledger().review(quiz_id)
    }

    /// Top scores, sized by `leaderboard_size`.
    pub async fn leaderboard(&self, force: bool) -> Result<Vec<LeaderboardEntry>> {
        self.ranks.top_n(self.config.leaderboard_size, force).await
    }

    pub async fn full_leaderboard(&self, force: bool) -> Result<Vec<LeaderboardEntry>> {
        self.ranks.full_ranking(force).await
    }

    pub async fn rank_of(&self, user_id: &str, force: bool) -> Result<Option<RankInfo>> {
        self.ranks.rank_of(user_id, force).await
    }

    pub fn status(&self) -> SyncStatus {
        self.coordinator.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.coordinator.subscribe_status()
    }

    /// Drop every cached value, e.g. on sign-out. Queue, locks and review
    /// snapshots are kept.
    pub fn clear_cache(&self) {
        self.cache.clear_all();
    }
}
