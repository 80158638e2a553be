//! quizsync-remote — Network implementations of the quizsync capabilities.
//!
//! Implements `ResultSink`, `LeaderboardSource` and `TimeSource` against a
//! PostgREST-style backend, a public time service fallback, and an HTTP
//! reachability probe, plus the TOML configuration that wires them into a
//! `SyncEngine`.

pub mod config;
pub mod http;
pub mod mock;
pub mod public_time;
pub mod reachability;

pub use config::{connect, load_config, load_config_from, QuizSyncConfig};
pub use http::HttpBackend;
pub use mock::{MockBackend, MockOutcome};
pub use public_time::WorldTimeSource;
pub use quizsync_core::error::RemoteError;
pub use reachability::HttpReachability;
