//! Durable queue of quiz results awaiting a successful remote commit.
//!
//! The whole queue lives in one store slot as a JSON array and every
//! mutation is a read-modify-write of that slot. Another writer on the same
//! store (a second tab or process) can interleave with these writes; the
//! remote commit is idempotent on `(user_id, quiz_id, taken_at_ms)`, so the
//! worst case is a duplicate replay, not a lost or doubled score.

use std::sync::Arc;

use crate::error::StoreError;
use crate::model::{AbandonedSubmission, PendingSubmission, SubmissionKey};
use crate::traits::PersistentStore;

/// Store slot holding the pending queue.
pub const QUEUE_SLOT: &str = "pending_quiz_submissions";

/// Store slot holding submissions dropped after a permanent rejection.
pub const ABANDONED_SLOT: &str = "abandoned_quiz_submissions";

/// What `enqueue` did with a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Added at the back of the queue.
    Appended,
    /// An entry with the same `(quiz_id, taken_at_ms)` is already queued.
    Duplicate,
    /// Replaced an older entry for the same `(quiz_id, user_id)` in place.
    Superseded,
    /// A newer entry for the same `(quiz_id, user_id)` is already queued.
    Stale,
}

#[derive(Clone)]
pub struct PendingQueue {
    store: Arc<dyn PersistentStore>,
}

impl PendingQueue {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self { store }
    }

    /// Current queue contents in insertion order.
    ///
    /// A store fault reads as an empty queue; use [`PendingQueue::load`] to
    /// tell the two apart.
    pub fn entries(&self) -> Vec<PendingSubmission> {
        self.load().unwrap_or_else(|e| {
            tracing::warn!("pending queue unreadable: {e}");
            Vec::new()
        })
    }

    /// Current queue contents, failing if the store cannot be read.
    ///
    /// A slot that cannot be parsed is moved aside to `<slot>.corrupt` and
    /// the queue restarts empty.
    pub fn load(&self) -> Result<Vec<PendingSubmission>, StoreError> {
        self.load_slot(QUEUE_SLOT)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Add a submission, coalescing duplicates.
    ///
    /// At most one entry per `(quiz_id, user_id)` is kept; the one with the
    /// later `taken_at_ms` wins.
    pub fn enqueue(&self, submission: PendingSubmission) -> Result<EnqueueOutcome, StoreError> {
        let mut entries = self.load()?;

        if entries.iter().any(|e| e.key() == submission.key()) {
            tracing::debug!(quiz_id = %submission.quiz_id, "submission already queued");
            return Ok(EnqueueOutcome::Duplicate);
        }

        let outcome = match entries
            .iter_mut()
            .find(|e| e.quiz_id == submission.quiz_id && e.user_id == submission.user_id)
        {
            Some(existing) if existing.taken_at_ms > submission.taken_at_ms => {
                return Ok(EnqueueOutcome::Stale);
            }
            Some(existing) => {
                *existing = submission;
                EnqueueOutcome::Superseded
            }
            None => {
                entries.push(submission);
                EnqueueOutcome::Appended
            }
        };

        self.write(&entries)?;
        tracing::info!(queued = entries.len(), ?outcome, "submission queued");
        Ok(outcome)
    }

    /// Remove the entry with `key`. Returns whether it was present.
    pub fn remove(&self, key: &SubmissionKey) -> Result<bool, StoreError> {
        let mut entries = self.load()?;
        let before = entries.len();
        entries.retain(|e| &e.key() != key);
        if entries.len() == before {
            return Ok(false);
        }
        self.write(&entries)?;
        Ok(true)
    }

    /// Remove queued entries for `(quiz_id, user_id)` older than
    /// `taken_at_ms`; a newer commit supersedes them.
    pub fn remove_superseded(
        &self,
        quiz_id: &str,
        user_id: &str,
        taken_at_ms: i64,
    ) -> Result<usize, StoreError> {
        let mut entries = self.load()?;
        let before = entries.len();
        entries.retain(|e| {
            !(e.quiz_id == quiz_id && e.user_id == user_id && e.taken_at_ms <= taken_at_ms)
        });
        let removed = before - entries.len();
        if removed > 0 {
            self.write(&entries)?;
        }
        Ok(removed)
    }

    /// Count a failed replay against the entry with `key`.
    pub fn record_failure(&self, key: &SubmissionKey, error: &str) -> Result<(), StoreError> {
        let mut entries = self.load()?;
        let Some(entry) = entries.iter_mut().find(|e| &e.key() == key) else {
            return Ok(());
        };
        entry.retry_count += 1;
        entry.last_error = Some(error.to_string());
        self.write(&entries)
    }

    /// Move an entry to the abandoned slot.
    pub fn abandon(
        &self,
        key: &SubmissionKey,
        reason: &str,
        now_ms: i64,
    ) -> Result<Option<AbandonedSubmission>, StoreError> {
        let mut entries = self.load()?;
        let Some(pos) = entries.iter().position(|e| &e.key() == key) else {
            return Ok(None);
        };
        let submission = entries.remove(pos);

        let dropped = AbandonedSubmission {
            submission,
            reason: reason.to_string(),
            abandoned_at_ms: now_ms,
        };
        let mut abandoned = self.load_abandoned()?;
        abandoned.push(dropped.clone());
        self.write_slot(ABANDONED_SLOT, &abandoned)?;
        self.write(&entries)?;

        tracing::warn!(
            quiz_id = %dropped.submission.quiz_id,
            reason,
            "submission abandoned after permanent rejection"
        );
        Ok(Some(dropped))
    }

    /// Submissions dropped after permanent rejections.
    pub fn abandoned(&self) -> Vec<AbandonedSubmission> {
        self.load_abandoned().unwrap_or_else(|e| {
            tracing::warn!("abandoned slot unreadable: {e}");
            Vec::new()
        })
    }

    pub fn load_abandoned(&self) -> Result<Vec<AbandonedSubmission>, StoreError> {
        self.load_slot(ABANDONED_SLOT)
    }

    fn load_slot<T: serde::de::DeserializeOwned>(&self, slot: &str) -> Result<Vec<T>, StoreError> {
        let Some(raw) = self.store.get(slot)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                tracing::warn!(slot, "slot corrupt, moving it aside: {e}");
                let aside = format!("{slot}.corrupt");
                self.store.set(&aside, &raw)?;
                self.store.remove(slot)?;
                Ok(Vec::new())
            }
        }
    }

    fn write(&self, entries: &[PendingSubmission]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return self.store.remove(QUEUE_SLOT);
        }
        self.write_slot(QUEUE_SLOT, entries)
    }

    fn write_slot<T: serde::Serialize + ?Sized>(&self, slot: &str, value: &T) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(value)
            .map_err(|e| StoreError::Io(format!("encode {slot}: {e}")))?;
        self.store.set(slot, &encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn pending(quiz: &str, user: &str, taken_at_ms: i64, score: i64) -> PendingSubmission {
        PendingSubmission {
            quiz_id: quiz.into(),
            user_id: user.into(),
            score,
            penalty: 0,
            taken_at_ms,
            answers: Default::default(),
            retry_count: 0,
            last_error: None,
        }
    }

    fn queue() -> (Arc<MemoryStore>, PendingQueue) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), PendingQueue::new(store))
    }

    #[test]
    fn identical_key_is_queued_once() {
        let (_store, queue) = queue();
        assert_eq!(
            queue.enqueue(pending("q1", "u1", 100, 40)).unwrap(),
            EnqueueOutcome::Appended
        );
        assert_eq!(
            queue.enqueue(pending("q1", "u1", 100, 40)).unwrap(),
            EnqueueOutcome::Duplicate
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn newer_attempt_supersedes_in_place() {
        let (_store, queue) = queue();
        queue.enqueue(pending("q1", "u1", 100, 10)).unwrap();
        queue.enqueue(pending("q2", "u1", 150, 20)).unwrap();
        assert_eq!(
            queue.enqueue(pending("q1", "u1", 200, 30)).unwrap(),
            EnqueueOutcome::Superseded
        );
        assert_eq!(
            queue.enqueue(pending("q1", "u1", 50, 5)).unwrap(),
            EnqueueOutcome::Stale
        );

        let entries = queue.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].quiz_id, "q1");
        assert_eq!(entries[0].score, 30);
        assert_eq!(entries[1].quiz_id, "q2");
    }

    #[test]
    fn other_users_are_not_coalesced() {
        let (_store, queue) = queue();
        queue.enqueue(pending("q1", "u1", 100, 10)).unwrap();
        queue.enqueue(pending("q1", "u2", 101, 10)).unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn queue_survives_reopen() {
        let (store, queue) = queue();
        queue.enqueue(pending("q1", "u1", 100, 10)).unwrap();
        drop(queue);

        let reopened = PendingQueue::new(store);
        assert_eq!(reopened.entries()[0].taken_at_ms, 100);
    }

    #[test]
    fn remove_and_failures() {
        let (store, queue) = queue();
        let first = pending("q1", "u1", 100, 10);
        queue.enqueue(first.clone()).unwrap();
        queue.enqueue(pending("q2", "u1", 200, 10)).unwrap();

        queue.record_failure(&first.key(), "offline").unwrap();
        queue.record_failure(&first.key(), "offline").unwrap();
        let entries = queue.entries();
        assert_eq!(entries[0].retry_count, 2);
        assert_eq!(entries[0].last_error.as_deref(), Some("offline"));

        assert!(queue.remove(&first.key()).unwrap());
        assert!(!queue.remove(&first.key()).unwrap());
        assert_eq!(queue.len(), 1);

        queue.remove(&pending("q2", "u1", 200, 10).key()).unwrap();
        assert!(queue.is_empty());
        assert_eq!(store.get(QUEUE_SLOT).unwrap(), None);
    }

    #[test]
    fn remove_superseded_keeps_newer_entries() {
        let (_store, queue) = queue();
        queue.enqueue(pending("q1", "u1", 100, 10)).unwrap();
        assert_eq!(queue.remove_superseded("q1", "u1", 90).unwrap(), 0);
        assert_eq!(queue.remove_superseded("q1", "u1", 100).unwrap(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn abandon_moves_to_dead_letter_slot() {
        let (_store, queue) = queue();
        let entry = pending("q1", "u1", 100, 10);
        queue.enqueue(entry.clone()).unwrap();

        let dropped = queue.abandon(&entry.key(), "quiz closed", 5_000).unwrap();
        assert_eq!(dropped.unwrap().reason, "quiz closed");
        assert!(queue.is_empty());
        assert_eq!(queue.abandoned().len(), 1);
        assert_eq!(queue.abandoned()[0].submission, entry);
    }

    #[test]
    fn corrupt_slot_is_moved_aside() {
        let (store, queue) = queue();
        store.set(QUEUE_SLOT, "[{oops").unwrap();
        assert!(queue.entries().is_empty());
        assert_eq!(
            store.get("pending_quiz_submissions.corrupt").unwrap().as_deref(),
            Some("[{oops")
        );
        queue.enqueue(pending("q1", "u1", 100, 10)).unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn read_fault_never_overwrites_the_queue() {
        let (store, queue) = queue();
        let first = pending("q1", "u1", 100, 10);
        queue.enqueue(first.clone()).unwrap();
        queue.enqueue(pending("q2", "u1", 200, 20)).unwrap();

        store.set_fail_reads(true);
        assert!(queue.enqueue(pending("q3", "u1", 300, 30)).is_err());
        assert!(queue.remove(&first.key()).is_err());
        assert!(queue.remove_superseded("q1", "u1", 100).is_err());
        assert!(queue.record_failure(&first.key(), "offline").is_err());
        assert!(queue.abandon(&first.key(), "closed", 1_000).is_err());
        assert!(queue.load().is_err());
        assert!(queue.entries().is_empty());
        store.set_fail_reads(false);

        let ids: Vec<_> = queue.entries().into_iter().map(|e| e.quiz_id).collect();
        assert_eq!(ids, ["q1", "q2"]);
        assert_eq!(queue.entries()[0].retry_count, 0);
        assert!(queue.abandoned().is_empty());
    }

    #[test]
    fn abandoned_slot_read_fault_keeps_the_entry_queued() {
        let (store, queue) = queue();
        let first = pending("q1", "u1", 100, 10);
        let second = pending("q2", "u1", 200, 10);
        queue.enqueue(first.clone()).unwrap();
        queue.enqueue(second.clone()).unwrap();
        queue.abandon(&first.key(), "closed", 1_000).unwrap();

        store.set_fail_reads(true);
        assert!(queue.load_abandoned().is_err());
        store.set_fail_reads(false);

        // Dead letters are never replaced with a partial list.
        queue.abandon(&second.key(), "closed", 2_000).unwrap();
        let ids: Vec<_> = queue
            .abandoned()
            .into_iter()
            .map(|a| a.submission.quiz_id)
            .collect();
        assert_eq!(ids, ["q1", "q2"]);
    }

    #[test]
    fn corrupt_abandoned_slot_is_moved_aside() {
        let (store, queue) = queue();
        store.set(ABANDONED_SLOT, "nope").unwrap();
        assert!(queue.load_abandoned().unwrap().is_empty());
        assert_eq!(
            store.get("abandoned_quiz_submissions.corrupt").unwrap().as_deref(),
            Some("nope")
        );
    }
}
