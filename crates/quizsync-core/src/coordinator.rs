//! Submission coordinator: score, lock, commit, or queue for replay.
//!
//! An attempt moves `Idle -> Scored -> Locked -> Committing` and ends in
//! `Committed` or `Queued`. The lock is written before any network call so
//! it holds on a device that is fully offline. Queued entries go back to
//! `Committing` on every drain until they succeed or are rejected for good.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::clock::ClockSync;
use crate::config::SyncConfig;
use crate::error::{is_permanent, RemoteError, SubmitError};
use crate::leaderboard::RankResolver;
use crate::lock::{AttemptLedger, LockStatus};
use crate::model::{
    Answers, PendingSubmission, Question, QuizAttemptRecord, SubmitReceipt, SubmitRequest,
};
use crate::queue::PendingQueue;
use crate::scoring::ScoreCard;
use crate::traits::ResultSink;

/// Lifecycle of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    Scored,
    Locked,
    Committing,
    Committed,
    Queued,
}

/// Background sync state, published for non-blocking display.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Idle,
    /// A drain is replaying queued results.
    Syncing,
    /// Results are waiting for the network.
    Pending { queued: usize },
    /// The last drain left failures behind. "Retry now" applies.
    Failed { queued: usize, last_error: String },
    /// Everything has reached the remote service.
    Synced,
}

/// A finished quiz, ready to be scored.
#[derive(Debug, Clone)]
pub struct CompletedQuiz {
    pub quiz_id: String,
    pub user_id: String,
    /// The questions as presented, after shuffling.
    pub questions: Vec<Question>,
    pub answers: Answers,
}

/// How a submission ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Recorded remotely.
    Committed {
        record: QuizAttemptRecord,
        card: ScoreCard,
        receipt: SubmitReceipt,
    },
    /// Stored locally; it will be replayed when the network returns.
    Queued {
        record: QuizAttemptRecord,
        card: ScoreCard,
        error: String,
    },
}

impl SubmissionOutcome {
    pub fn state(&self) -> AttemptState {
        match self {
            SubmissionOutcome::Committed { .. } => AttemptState::Committed,
            SubmissionOutcome::Queued { .. } => AttemptState::Queued,
        }
    }

    pub fn record(&self) -> &QuizAttemptRecord {
        match self {
            SubmissionOutcome::Committed { record, .. } | SubmissionOutcome::Queued { record, .. } => {
                record
            }
        }
    }

    pub fn card(&self) -> &ScoreCard {
        match self {
            SubmissionOutcome::Committed { card, .. } | SubmissionOutcome::Queued { card, .. } => card,
        }
    }
}

/// Summary of one pass over the pending queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub committed: usize,
    /// Transient failures, still queued.
    pub failed: usize,
    /// Permanent rejections, moved to the abandoned slot.
    pub abandoned: usize,
    /// Entries left in the queue after the pass.
    pub remaining: usize,
    pub status: SyncStatus,
}

pub struct SubmissionCoordinator {
    sink: Arc<dyn ResultSink>,
    ledger: AttemptLedger,
    queue: PendingQueue,
    ranks: Arc<RankResolver>,
    clock: Arc<ClockSync>,
    config: SyncConfig,
    status: watch::Sender<SyncStatus>,
    drain_guard: Mutex<()>,
}

impl SubmissionCoordinator {
    pub fn new(
        sink: Arc<dyn ResultSink>,
        ledger: AttemptLedger,
        queue: PendingQueue,
        ranks: Arc<RankResolver>,
        clock: Arc<ClockSync>,
        config: SyncConfig,
    ) -> Self {
        let initial = match queue.len() {
            0 => SyncStatus::Idle,
            queued => SyncStatus::Pending { queued },
        };
        let (status, _) = watch::channel(initial);
        Self {
            sink,
            ledger,
            queue,
            ranks,
            clock,
            config,
            status,
            drain_guard: Mutex::new(()),
        }
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    pub fn ledger(&self) -> &AttemptLedger {
        &self.ledger
    }

    pub fn ranks(&self) -> &RankResolver {
        &self.ranks
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Lock state of `(user_id, quiz_id)` at the corrected time.
    pub fn lock_status(&self, user_id: &str, quiz_id: &str) -> LockStatus {
        self.ledger
            .lock_status(user_id, quiz_id, self.clock.corrected_now_ms())
    }

    pub fn can_attempt(&self, user_id: &str, quiz_id: &str) -> bool {
        !self.lock_status(user_id, quiz_id).is_locked()
    }

    /// Score a finished quiz, lock it, and try to commit it.
    ///
    /// Transient remote failures end in [`SubmissionOutcome::Queued`];
    /// only permanent rejections and local faults are errors.
    pub async fn submit(&self, quiz: CompletedQuiz) -> Result<SubmissionOutcome, SubmitError> {
        crate::bank::validate_questions(&quiz.questions)?;

        // High-stakes mode reads the cached rank only, so nothing awaits
        // between the lock check and the lock write.
        let current_score = self.ranks.cached_rank(&quiz.user_id).map(|r| r.score);
        let card = self
            .config
            .scoring
            .score(&quiz.questions, &quiz.answers, current_score);
        self.trace(&quiz, AttemptState::Scored);

        let now_ms = self.clock.corrected_now_ms();
        if let LockStatus::Locked { unlocks_at_ms } =
            self.ledger.lock_status(&quiz.user_id, &quiz.quiz_id, now_ms)
        {
            return Err(SubmitError::AttemptLocked {
                quiz_id: quiz.quiz_id,
                unlocks_at_ms,
            });
        }

        let record = QuizAttemptRecord {
            quiz_id: quiz.quiz_id.clone(),
            user_id: quiz.user_id.clone(),
            score: card.score,
            penalty: card.penalty,
            answers: quiz.answers.clone(),
            taken_at_ms: now_ms,
        };

        // Locked
        if let Err(e) = self.ledger.record(&record) {
            tracing::warn!(quiz_id = %record.quiz_id, "could not persist attempt lock: {e}");
        }
        self.trace(&quiz, AttemptState::Locked);

        // Committing
        self.trace(&quiz, AttemptState::Committing);
        match self.sink.submit(&SubmitRequest::from(&record)).await {
            Ok(receipt) => {
                self.on_committed(&record.user_id, &record.quiz_id, record.taken_at_ms, &receipt)
                    .await;
                tracing::info!(
                    quiz_id = %record.quiz_id,
                    score = record.score,
                    "submission committed"
                );
                self.publish_queue_state();
                Ok(SubmissionOutcome::Committed {
                    record,
                    card,
                    receipt,
                })
            }
            Err(e) if is_permanent(&e) => {
                let message = remote_message(&e);
                tracing::warn!(quiz_id = %record.quiz_id, "submission rejected: {message}");
                Err(SubmitError::Rejected(message))
            }
            Err(e) => {
                let error = format!("{e:#}");
                let mut pending = PendingSubmission::from(&record);
                pending.last_error = Some(error.clone());
                self.queue.enqueue(pending)?;
                tracing::info!(
                    quiz_id = %record.quiz_id,
                    "submission queued for retry: {error}"
                );
                self.publish_queue_state();
                Ok(SubmissionOutcome::Queued {
                    record,
                    card,
                    error,
                })
            }
        }
    }

    /// Replay every queued submission once, in insertion order.
    ///
    /// Returns `None` when another drain is already running.
    pub async fn drain(&self) -> Option<DrainReport> {
        let Ok(_guard) = self.drain_guard.try_lock() else {
            tracing::debug!("drain already in progress");
            return None;
        };

        let entries = self.queue.entries();
        if entries.is_empty() {
            return Some(DrainReport {
                committed: 0,
                failed: 0,
                abandoned: 0,
                remaining: 0,
                status: self.status(),
            });
        }

        self.status.send_replace(SyncStatus::Syncing);
        tracing::info!(queued = entries.len(), "draining pending submissions");

        let mut committed = 0;
        let mut failed = 0;
        let mut abandoned = 0;
        let mut last_error = None;

        for entry in entries {
            let key = entry.key();
            match self.sink.submit(&entry.request()).await {
                Ok(receipt) => {
                    if let Err(e) = self.queue.remove(&key) {
                        tracing::warn!(quiz_id = %entry.quiz_id, "could not dequeue committed entry: {e}");
                    }
                    self.on_committed(&entry.user_id, &entry.quiz_id, entry.taken_at_ms, &receipt)
                        .await;
                    committed += 1;
                }
                Err(e) if is_permanent(&e) => {
                    let message = remote_message(&e);
                    if let Err(store_err) =
                        self.queue
                            .abandon(&key, &message, self.clock.corrected_now_ms())
                    {
                        tracing::warn!("could not abandon rejected entry: {store_err}");
                    }
                    abandoned += 1;
                    last_error = Some(message);
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    tracing::debug!(quiz_id = %entry.quiz_id, "replay failed: {message}");
                    if let Err(store_err) = self.queue.record_failure(&key, &message) {
                        tracing::warn!("could not record replay failure: {store_err}");
                    }
                    failed += 1;
                    last_error = Some(message);
                }
            }
        }

        let remaining = self.queue.len();
        let status = match last_error {
            Some(last_error) => SyncStatus::Failed {
                queued: remaining,
                last_error,
            },
            None if remaining > 0 => SyncStatus::Pending { queued: remaining },
            None => SyncStatus::Synced,
        };
        self.status.send_replace(status.clone());
        tracing::info!(committed, failed, abandoned, remaining, "drain finished");

        Some(DrainReport {
            committed,
            failed,
            abandoned,
            remaining,
            status,
        })
    }

    async fn on_committed(
        &self,
        user_id: &str,
        quiz_id: &str,
        taken_at_ms: i64,
        receipt: &SubmitReceipt,
    ) {
        if let Err(e) = self.ledger.confirm(user_id, quiz_id, taken_at_ms, receipt) {
            tracing::warn!(quiz_id, "could not confirm attempt lock: {e}");
        }
        if let Err(e) = self.queue.remove_superseded(quiz_id, user_id, taken_at_ms) {
            tracing::warn!(quiz_id, "could not drop superseded entries: {e}");
        }
        if let Err(e) = self
            .ranks
            .refresh_after_commit(user_id, self.config.leaderboard_size)
            .await
        {
            tracing::warn!(user_id, "leaderboard refresh failed: {e:#}");
        }
    }

    fn publish_queue_state(&self) {
        let status = match self.queue.len() {
            0 => SyncStatus::Synced,
            queued => SyncStatus::Pending { queued },
        };
        self.status.send_replace(status);
    }

    fn trace(&self, quiz: &CompletedQuiz, state: AttemptState) {
        tracing::debug!(quiz_id = %quiz.quiz_id, user_id = %quiz.user_id, ?state, "attempt");
    }
}

/// The remote-provided message for a permanent failure.
fn remote_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<RemoteError>() {
        Some(RemoteError::Rejected(message)) | Some(RemoteError::AuthenticationFailed(message)) => {
            message.clone()
        }
        _ => format!("{err:#}"),
    }
}
