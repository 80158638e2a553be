//! Local clocks and the server clock synchronizer.
//!
//! [`ClockSync`] estimates `offset = remote - local` from an authoritative
//! [`TimeSource`] and serves `corrected_now = local_now + offset`. The offset
//! is cached (30 minutes by default) and recomputed on a cache miss. One
//! round trip of latency is folded into the estimate; this is not NTP.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::cache::TtlCache;
use crate::traits::{Clock, TimeSource};

/// Cache key holding the last computed offset.
pub const OFFSET_CACHE_KEY: &str = "server_time_offset";

/// Store slot holding the last offset ever computed. It has no expiry and
/// sits outside the cache namespace, so a reload while offline still starts
/// from the measured skew.
pub const LAST_OFFSET_SLOT: &str = "last_server_time_offset";

/// Real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }
}

/// A settable clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Corrects the local clock against the server's.
pub struct ClockSync {
    clock: Arc<dyn Clock>,
    cache: TtlCache,
    primary: Arc<dyn TimeSource>,
    fallback: Option<Arc<dyn TimeSource>>,
    ttl: Duration,
    /// Last offset seen, mirrored to [`LAST_OFFSET_SLOT`]. Outlives cache
    /// expiry so a failed refresh keeps serving the stale estimate.
    last_known: Mutex<Option<i64>>,
}

impl ClockSync {
    pub fn new(
        clock: Arc<dyn Clock>,
        cache: TtlCache,
        primary: Arc<dyn TimeSource>,
        fallback: Option<Arc<dyn TimeSource>>,
    ) -> Self {
        Self {
            clock,
            cache,
            primary,
            fallback,
            ttl: Duration::from_secs(30 * 60),
            last_known: Mutex::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Uncorrected local time.
    pub fn local_now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Local time adjusted by the best known offset. Never blocks.
    pub fn corrected_now_ms(&self) -> i64 {
        self.local_now_ms() + self.current_offset_ms()
    }

    /// The cached offset, else the last one seen this session, else zero.
    pub fn current_offset_ms(&self) -> i64 {
        match self.cache.get::<i64>(OFFSET_CACHE_KEY) {
            Some(offset) => {
                self.remember(offset);
                offset
            }
            None => self.last_known().unwrap_or(0),
        }
    }

    /// The offset, fetching a fresh one when the cached value has expired.
    pub async fn offset_ms(&self) -> i64 {
        match self.cache.get::<i64>(OFFSET_CACHE_KEY) {
            Some(offset) => {
                self.remember(offset);
                offset
            }
            None => self.refresh().await,
        }
    }

    /// Query the time sources, primary first, and cache the new offset.
    ///
    /// When every source fails the previous estimate (or zero) is kept.
    pub async fn refresh(&self) -> i64 {
        let sources = std::iter::once(&self.primary).chain(self.fallback.iter());
        for source in sources {
            match source.now_ms().await {
                Ok(remote_ms) => {
                    let offset = remote_ms - self.clock.now_ms();
                    tracing::info!(source = source.name(), offset_ms = offset, "clock synchronized");
                    self.cache.set(OFFSET_CACHE_KEY, &offset, self.ttl);
                    self.remember(offset);
                    return offset;
                }
                Err(e) => {
                    tracing::warn!(source = source.name(), "time source failed: {e:#}");
                }
            }
        }

        let stale = self.last_known().unwrap_or(0);
        tracing::warn!(offset_ms = stale, "all time sources failed, keeping previous offset");
        stale
    }

    fn remember(&self, offset: i64) {
        let Ok(mut last) = self.last_known.lock() else {
            return;
        };
        if *last == Some(offset) {
            return;
        }
        *last = Some(offset);
        if let Err(e) = self
            .cache
            .store()
            .set(LAST_OFFSET_SLOT, &offset.to_string())
        {
            tracing::warn!("could not persist clock offset: {e}");
        }
    }

    fn last_known(&self) -> Option<i64> {
        let mut last = self.last_known.lock().ok()?;
        if last.is_none() {
            *last = match self.cache.store().get(LAST_OFFSET_SLOT) {
                Ok(raw) => raw.and_then(|raw| raw.trim().parse().ok()),
                Err(e) => {
                    tracing::warn!("persisted clock offset unreadable: {e}");
                    None
                }
            };
        }
        *last
    }
}
