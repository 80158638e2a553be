//! Core data model types for quizsync.
//!
//! Timestamps are milliseconds since the Unix epoch, signed so that clock
//! offsets and window arithmetic stay in one integer type.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single multiple-choice question.
///
/// Field aliases accept the camelCase layout used by the quiz content files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Unique identifier within its bank.
    pub id: String,
    /// The question text.
    #[serde(alias = "question")]
    pub prompt: String,
    /// Answer choices in display order.
    #[serde(alias = "options")]
    pub choices: Vec<String>,
    /// Index into `choices` of the correct answer.
    #[serde(alias = "correctAnswerIndex", alias = "correct_answer_index")]
    pub correct_index: usize,
    /// Optional explanation shown when reviewing.
    #[serde(default)]
    pub explanation: Option<String>,
}

impl Question {
    /// The text of the correct choice, if the index is in range.
    pub fn correct_choice(&self) -> Option<&str> {
        self.choices.get(self.correct_index).map(String::as_str)
    }

    /// Whether `choice` is the correct answer for this question.
    pub fn is_correct(&self, choice: usize) -> bool {
        choice == self.correct_index
    }
}

/// Answers keyed by question id, valued by the selected choice index.
pub type Answers = BTreeMap<String, usize>;

/// A scored quiz attempt, recorded before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizAttemptRecord {
    pub quiz_id: String,
    pub user_id: String,
    /// Final score after any penalty. May be negative.
    pub score: i64,
    /// Points subtracted for wrong answers in high-stakes mode.
    #[serde(default)]
    pub penalty: i64,
    #[serde(default)]
    pub answers: Answers,
    /// Corrected (server-aligned) time at which the attempt was submitted.
    pub taken_at_ms: i64,
}

/// A result that failed to reach the remote service and awaits replay.
///
/// Identified by `(quiz_id, taken_at_ms)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSubmission {
    pub quiz_id: String,
    pub user_id: String,
    pub score: i64,
    #[serde(default)]
    pub penalty: i64,
    pub taken_at_ms: i64,
    #[serde(default)]
    pub answers: Answers,
    #[serde(default)]
    pub retry_count: u32,
    /// Message of the most recent failed replay.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl PendingSubmission {
    /// The de-duplication key of this entry.
    pub fn key(&self) -> SubmissionKey {
        SubmissionKey {
            quiz_id: self.quiz_id.clone(),
            taken_at_ms: self.taken_at_ms,
        }
    }

    /// The payload replayed against the remote service.
    pub fn request(&self) -> SubmitRequest {
        SubmitRequest {
            quiz_id: self.quiz_id.clone(),
            user_id: self.user_id.clone(),
            score: self.score,
            penalty: self.penalty,
            taken_at_ms: self.taken_at_ms,
        }
    }
}

impl From<&QuizAttemptRecord> for PendingSubmission {
    fn from(record: &QuizAttemptRecord) -> Self {
        Self {
            quiz_id: record.quiz_id.clone(),
            user_id: record.user_id.clone(),
            score: record.score,
            penalty: record.penalty,
            taken_at_ms: record.taken_at_ms,
            answers: record.answers.clone(),
            retry_count: 0,
            last_error: None,
        }
    }
}

/// Identity of a pending submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubmissionKey {
    pub quiz_id: String,
    pub taken_at_ms: i64,
}

/// A submission that was dropped from the queue after a permanent rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbandonedSubmission {
    pub submission: PendingSubmission,
    pub reason: String,
    pub abandoned_at_ms: i64,
}

/// Payload of the remote "submit result" operation.
///
/// `user_id` and `taken_at_ms` travel along so the service can de-duplicate
/// replays on `(user_id, quiz_id, taken_at_ms)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub quiz_id: String,
    pub user_id: String,
    pub score: i64,
    pub penalty: i64,
    pub taken_at_ms: i64,
}

impl From<&QuizAttemptRecord> for SubmitRequest {
    fn from(record: &QuizAttemptRecord) -> Self {
        Self {
            quiz_id: record.quiz_id.clone(),
            user_id: record.user_id.clone(),
            score: record.score,
            penalty: record.penalty,
            taken_at_ms: record.taken_at_ms,
        }
    }
}

/// What the remote service acknowledged for a committed result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    /// Server-side time the attempt was recorded, when reported.
    #[serde(default)]
    pub recorded_at_ms: Option<i64>,
    /// The user's total after this result, when reported.
    #[serde(default)]
    pub total_score: Option<i64>,
}

/// One row of the leaderboard as served by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: String,
    #[serde(default)]
    pub full_name: String,
    pub score: i64,
    #[serde(default)]
    pub training_level: Option<u32>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// A user's ordinal position on the leaderboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankInfo {
    /// `1 + count(scores strictly greater than score)`.
    pub rank: u64,
    pub score: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_accepts_content_file_layout() {
        let json = r#"{
            "id": "q1",
            "question": "Which glove class is rated for 11kV?",
            "options": ["Class 00", "Class 0", "Class 1", "Class 2"],
            "correctAnswerIndex": 3
        }"#;
        let q: Question = serde_json::from_str(json).unwrap();
        assert_eq!(q.prompt, "Which glove class is rated for 11kV?");
        assert_eq!(q.correct_choice(), Some("Class 2"));
        assert!(q.is_correct(3));
        assert!(q.explanation.is_none());
    }

    #[test]
    fn pending_from_attempt_starts_fresh() {
        let record = QuizAttemptRecord {
            quiz_id: "weekly-7".into(),
            user_id: "u1".into(),
            score: 40,
            penalty: 0,
            answers: Answers::from([("q1".to_string(), 2)]),
            taken_at_ms: 1_700_000_000_000,
        };
        let pending = PendingSubmission::from(&record);
        assert_eq!(pending.retry_count, 0);
        assert_eq!(pending.score, 40);
        assert_eq!(
            pending.key(),
            SubmissionKey {
                quiz_id: "weekly-7".into(),
                taken_at_ms: 1_700_000_000_000
            }
        );
        assert_eq!(pending.request(), SubmitRequest::from(&record));
    }

    #[test]
    fn pending_tolerates_missing_optional_fields() {
        let json = r#"{"quiz_id":"a","user_id":"u","score":5,"taken_at_ms":10}"#;
        let pending: PendingSubmission = serde_json::from_str(json).unwrap();
        assert_eq!(pending.penalty, 0);
        assert!(pending.answers.is_empty());
        assert!(pending.last_error.is_none());
    }
}
