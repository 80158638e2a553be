//! Capability traits the engine is built against.
//!
//! Durable storage, wall-clock time, the remote service and the platform's
//! connectivity signals are all injected so every component can run against
//! in-memory fakes. Implementations live in `quizsync-remote` and
//! `quizsync-store`.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::StoreError;
use crate::model::{LeaderboardEntry, SubmitReceipt, SubmitRequest};

// ---------------------------------------------------------------------------
// Local capabilities
// ---------------------------------------------------------------------------

/// A durable string key-value store that survives reloads.
///
/// Every write replaces the whole value. Callers treat read-modify-write
/// sequences as possibly racing with another writer on the same store.
pub trait PersistentStore: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Replace the value stored under `key`.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete `key`. Deleting a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// List every key currently stored.
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Source of local wall-clock time.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch according to this device.
    fn now_ms(&self) -> i64;
}

/// Platform connectivity signals.
#[async_trait]
pub trait Connectivity: Send + Sync {
    /// The platform's current online flag.
    fn is_online(&self) -> bool;

    /// Subscribe to online/offline transitions.
    fn subscribe(&self) -> watch::Receiver<bool>;

    /// Check actual reachability. Used by the polling fallback to catch
    /// transitions whose events were missed.
    async fn probe(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Remote capabilities
// ---------------------------------------------------------------------------

/// An authoritative time endpoint.
#[async_trait]
pub trait TimeSource: Send + Sync {
    /// Human-readable source name (e.g. "backend").
    fn name(&self) -> &str;

    /// Current remote time in milliseconds since the Unix epoch.
    async fn now_ms(&self) -> anyhow::Result<i64>;
}

/// The remote "submit result" operation.
///
/// Implementations must be safe to call repeatedly for the same
/// `(user_id, quiz_id, taken_at_ms)`. Errors should be
/// [`RemoteError`](crate::error::RemoteError)s so callers can tell transient
/// failures from permanent ones.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn submit(&self, request: &SubmitRequest) -> anyhow::Result<SubmitReceipt>;
}

/// Read access to the ranked score table.
#[async_trait]
pub trait LeaderboardSource: Send + Sync {
    /// Rows ordered by score, highest first. `None` returns every row.
    async fn top_scores(&self, limit: Option<usize>) -> anyhow::Result<Vec<LeaderboardEntry>>;

    /// The user's current score, if they have one.
    async fn user_score(&self, user_id: &str) -> anyhow::Result<Option<i64>>;

    /// Number of rows whose score is strictly greater than `score`.
    async fn count_scores_above(&self, score: i64) -> anyhow::Result<u64>;
}
