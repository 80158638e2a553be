//! quizsync-core — Offline-resilient quiz scoring and result sync.
//!
//! This crate holds the data model, capability traits and every piece of
//! the engine: TTL cache, clock correction, quiz randomization, attempt
//! locks, scoring, the pending submission queue, rank resolution and the
//! coordinator that ties them together. Network and disk implementations
//! of the traits live in `quizsync-remote` and `quizsync-store`.

pub mod bank;
pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod leaderboard;
pub mod lock;
pub mod memory;
pub mod model;
pub mod queue;
pub mod randomizer;
pub mod scoring;
pub mod traits;
pub mod trigger;

#[cfg(test)]
pub(crate) mod testing;

pub use config::SyncConfig;
pub use coordinator::{CompletedQuiz, SubmissionOutcome, SyncStatus};
pub use engine::{EngineParts, SyncEngine};
pub use error::{QuizError, RemoteError, StoreError, SubmitError};
