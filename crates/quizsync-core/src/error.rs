//! Error types shared across the sync engine.
//!
//! `RemoteError` is defined here rather than in `quizsync-remote` so the
//! coordinator can downcast `anyhow` errors returned by the capability traits
//! and decide between queueing and surfacing without string matching.

use thiserror::Error;

/// Faults raised by a [`PersistentStore`](crate::traits::PersistentStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing medium could not be read or written.
    #[error("storage I/O error: {0}")]
    Io(String),

    /// The store refused the write (e.g. a quota was exceeded).
    #[error("storage quota exceeded for key '{0}'")]
    QuotaExceeded(String),

    /// The store is not reachable at all.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Errors that can occur when talking to the remote quiz service.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The API returned a 429 rate limit response.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// The caller's identity was rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The service refused the payload (validation failure, closed quiz, ...).
    #[error("rejected by remote: {0}")]
    Rejected(String),

    /// The API returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    NetworkError(String),
}

impl RemoteError {
    /// Returns `true` if this error is permanent and should not be retried.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            RemoteError::AuthenticationFailed(_) | RemoteError::Rejected(_)
        )
    }

    /// Returns the retry-after delay in milliseconds, if applicable.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            RemoteError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

/// Classify an error returned by a capability trait.
///
/// Anything that is not a [`RemoteError`] is assumed transient.
pub fn is_permanent(err: &anyhow::Error) -> bool {
    err.downcast_ref::<RemoteError>()
        .is_some_and(RemoteError::is_permanent)
}

/// Quiz-bank faults. These are raised before an attempt can start.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuizError {
    /// The bank contains no questions.
    #[error("question bank is empty")]
    EmptyBank,

    /// A question cannot be graded as stored.
    #[error("question '{id}' is malformed: {reason}")]
    MalformedQuestion { id: String, reason: String },

    /// Two questions share an id, so answers could not be told apart.
    #[error("duplicate question id: {0}")]
    DuplicateQuestion(String),

    /// Zero questions were requested.
    #[error("a quiz needs at least one question")]
    EmptySelection,
}

/// Errors surfaced by the submission coordinator.
///
/// Transient network failures are never returned here; they end in the
/// pending queue instead.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The quiz was already attempted inside the current lock window.
    #[error("quiz '{quiz_id}' is locked until {unlocks_at_ms}")]
    AttemptLocked { quiz_id: String, unlocks_at_ms: i64 },

    /// The attempt could not be scored.
    #[error(transparent)]
    InvalidQuiz(#[from] QuizError),

    /// The remote service permanently refused the result.
    #[error("submission rejected: {0}")]
    Rejected(String),

    /// The result could not be persisted for a later retry.
    #[error("could not persist pending submission: {0}")]
    Storage(#[from] StoreError),
}
