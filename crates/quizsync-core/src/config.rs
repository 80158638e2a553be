//! Tunables for the sync engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_NAMESPACE;
use crate::lock::LockWindow;
use crate::scoring::ScoringPolicy;

/// Engine settings. Every field has a default, so an empty `[sync]` table
/// is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Prefix for every cache key in the persistent store.
    #[serde(default = "default_cache_namespace")]
    pub cache_namespace: String,

    #[serde(default = "default_clock_offset_ttl_secs")]
    pub clock_offset_ttl_secs: u64,

    #[serde(default = "default_leaderboard_ttl_secs")]
    pub leaderboard_ttl_secs: u64,

    /// TTL of the "view all" ranking, cached under its own key.
    #[serde(default = "default_leaderboard_ttl_secs")]
    pub full_leaderboard_ttl_secs: u64,

    #[serde(default = "default_leaderboard_size")]
    pub leaderboard_size: usize,

    /// Fallback drain poll, for missed connectivity events.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_shuffle_delay_ms")]
    pub shuffle_delay_ms: u64,

    #[serde(default)]
    pub lock_window: LockWindow,

    /// Offset from UTC, in minutes, of the calendar that lock windows follow.
    #[serde(default)]
    pub lock_utc_offset_minutes: i32,

    #[serde(default)]
    pub scoring: ScoringPolicy,
}

fn default_cache_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}
fn default_clock_offset_ttl_secs() -> u64 {
    30 * 60
}
fn default_leaderboard_ttl_secs() -> u64 {
    5 * 60
}
fn default_leaderboard_size() -> usize {
    10
}
fn default_poll_interval_secs() -> u64 {
    30
}
fn default_shuffle_delay_ms() -> u64 {
    500
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cache_namespace: default_cache_namespace(),
            clock_offset_ttl_secs: default_clock_offset_ttl_secs(),
            leaderboard_ttl_secs: default_leaderboard_ttl_secs(),
            full_leaderboard_ttl_secs: default_leaderboard_ttl_secs(),
            leaderboard_size: default_leaderboard_size(),
            poll_interval_secs: default_poll_interval_secs(),
            shuffle_delay_ms: default_shuffle_delay_ms(),
            lock_window: LockWindow::default(),
            lock_utc_offset_minutes: 0,
            scoring: ScoringPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn clock_offset_ttl(&self) -> Duration {
        Duration::from_secs(self.clock_offset_ttl_secs)
    }

    pub fn leaderboard_ttl(&self) -> Duration {
        Duration::from_secs(self.leaderboard_ttl_secs)
    }

    pub fn full_leaderboard_ttl(&self) -> Duration {
        Duration::from_secs(self.full_leaderboard_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn shuffle_delay(&self) -> Duration {
        Duration::from_millis(self.shuffle_delay_ms)
    }
}
