//! Attempt locks and review snapshots.
//!
//! A user may not re-attempt a periodic quiz while the corrected clock is in
//! the same calendar window as their last recorded attempt. The lock is read
//! purely from local storage so it holds while the device is offline.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::{QuizAttemptRecord, SubmitReceipt};
use crate::traits::PersistentStore;

/// Calendar granularity of the re-attempt lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockWindow {
    #[default]
    Hourly,
    Daily,
}

impl LockWindow {
    /// Start of the window containing `ts_ms`, in the given UTC offset.
    pub fn start_ms(&self, ts_ms: i64, utc_offset_minutes: i32) -> i64 {
        let Some(offset) = FixedOffset::east_opt(utc_offset_minutes * 60) else {
            return self.start_ms(ts_ms, 0);
        };
        let Some(local) = DateTime::from_timestamp_millis(ts_ms).map(|t| t.with_timezone(&offset))
        else {
            return ts_ms;
        };
        let hour = match self {
            LockWindow::Hourly => local.hour(),
            LockWindow::Daily => 0,
        };
        let start = NaiveTime::from_hms_opt(hour, 0, 0)
            .map(|time| local.date_naive().and_time(time))
            .and_then(|naive| offset.from_local_datetime(&naive).single());
        start.map(|s| s.timestamp_millis()).unwrap_or(ts_ms)
    }

    /// First instant after the window containing `ts_ms`.
    pub fn end_ms(&self, ts_ms: i64, utc_offset_minutes: i32) -> i64 {
        let length = match self {
            LockWindow::Hourly => 3_600_000,
            LockWindow::Daily => 86_400_000,
        };
        self.start_ms(ts_ms, utc_offset_minutes) + length
    }

    /// Whether two instants fall inside the same window.
    pub fn same_window(&self, a_ms: i64, b_ms: i64, utc_offset_minutes: i32) -> bool {
        self.start_ms(a_ms, utc_offset_minutes) == self.start_ms(b_ms, utc_offset_minutes)
    }
}

/// Whether a quiz can be started right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Unlocked,
    Locked { unlocks_at_ms: i64 },
}

impl LockStatus {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockStatus::Locked { .. })
    }
}

/// Durable per-user lock snapshots and per-quiz review snapshots.
#[derive(Clone)]
pub struct AttemptLedger {
    store: Arc<dyn PersistentStore>,
    window: LockWindow,
    utc_offset_minutes: i32,
}

impl AttemptLedger {
    pub fn new(store: Arc<dyn PersistentStore>, window: LockWindow) -> Self {
        Self {
            store,
            window,
            utc_offset_minutes: 0,
        }
    }

    pub fn with_utc_offset(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = minutes;
        self
    }

    pub fn window(&self) -> LockWindow {
        self.window
    }

    /// Store key of the lock snapshot for `(user_id, quiz_id)`.
    pub fn lock_key(user_id: &str, quiz_id: &str) -> String {
        format!("last_attempt:{user_id}:{quiz_id}")
    }

    /// Store key of the review snapshot for `quiz_id`.
    pub fn review_key(quiz_id: &str) -> String {
        format!("review:{quiz_id}")
    }

    /// Write both snapshots of a freshly scored attempt.
    pub fn record(&self, record: &QuizAttemptRecord) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(record)
            .map_err(|e| StoreError::Io(format!("encode attempt: {e}")))?;
        self.store.set(
            &Self::lock_key(&record.user_id, &record.quiz_id),
            &encoded,
        )?;
        self.store
            .set(&Self::review_key(&record.quiz_id), &encoded)?;
        tracing::info!(
            quiz_id = %record.quiz_id,
            user_id = %record.user_id,
            taken_at_ms = record.taken_at_ms,
            "attempt locked"
        );
        Ok(())
    }

    /// Re-anchor the lock for the attempt taken at `taken_at_ms` on the
    /// server-confirmed time, if the receipt carries one. A lock that already
    /// belongs to a later attempt is left alone.
    pub fn confirm(
        &self,
        user_id: &str,
        quiz_id: &str,
        taken_at_ms: i64,
        receipt: &SubmitReceipt,
    ) -> Result<(), StoreError> {
        let Some(recorded_at_ms) = receipt.recorded_at_ms else {
            return Ok(());
        };
        let Some(mut record) = self.last_attempt(user_id, quiz_id) else {
            return Ok(());
        };
        if record.taken_at_ms != taken_at_ms || record.taken_at_ms == recorded_at_ms {
            return Ok(());
        }
        record.taken_at_ms = recorded_at_ms;
        let encoded = serde_json::to_string(&record)
            .map_err(|e| StoreError::Io(format!("encode attempt: {e}")))?;
        self.store
            .set(&Self::lock_key(user_id, quiz_id), &encoded)
    }

    /// The lock snapshot for `(user_id, quiz_id)`. Unreadable snapshots are
    /// removed and reported as absent.
    pub fn last_attempt(&self, user_id: &str, quiz_id: &str) -> Option<QuizAttemptRecord> {
        self.read_snapshot(&Self::lock_key(user_id, quiz_id))
    }

    /// The most recent attempt at `quiz_id`, for the review screen.
    pub fn review(&self, quiz_id: &str) -> Option<QuizAttemptRecord> {
        self.read_snapshot(&Self::review_key(quiz_id))
    }

    /// Lock state at the corrected time `now_ms`.
    pub fn lock_status(&self, user_id: &str, quiz_id: &str, now_ms: i64) -> LockStatus {
        let Some(last) = self.last_attempt(user_id, quiz_id) else {
            return LockStatus::Unlocked;
        };
        if self
            .window
            .same_window(last.taken_at_ms, now_ms, self.utc_offset_minutes)
        {
            LockStatus::Locked {
                unlocks_at_ms: self.window.end_ms(last.taken_at_ms, self.utc_offset_minutes),
            }
        } else {
            LockStatus::Unlocked
        }
    }

    pub fn can_attempt(&self, user_id: &str, quiz_id: &str, now_ms: i64) -> bool {
        !self.lock_status(user_id, quiz_id, now_ms).is_locked()
    }

    fn read_snapshot(&self, key: &str) -> Option<QuizAttemptRecord> {
        let raw = match self.store.get(key) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(key, "attempt snapshot unreadable: {e}");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(key, "removing malformed attempt snapshot: {e}");
                if let Err(e) = self.store.remove(key) {
                    tracing::warn!(key, "could not remove snapshot: {e}");
                }
                None
            }
        }
    }
}
