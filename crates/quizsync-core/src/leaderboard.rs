//! Cached leaderboard reads and rank resolution.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::cache::TtlCache;
use crate::model::{LeaderboardEntry, RankInfo};
use crate::traits::LeaderboardSource;

const FULL_RANKING_KEY: &str = "leaderboard_full";

fn top_key(n: usize) -> String {
    format!("leaderboard_top_{n}")
}

fn rank_key(user_id: &str) -> String {
    format!("user_rank_{user_id}")
}

/// Serves top-N lists, the full ranking and per-user ranks from cache,
/// falling back to the remote source on a miss.
pub struct RankResolver {
    source: Arc<dyn LeaderboardSource>,
    cache: TtlCache,
    ttl: Duration,
    full_ttl: Duration,
}

impl RankResolver {
    pub fn new(source: Arc<dyn LeaderboardSource>, cache: TtlCache) -> Self {
        Self {
            source,
            cache,
            ttl: Duration::from_secs(5 * 60),
            full_ttl: Duration::from_secs(5 * 60),
        }
    }

    pub fn with_ttls(mut self, ttl: Duration, full_ttl: Duration) -> Self {
        self.ttl = ttl;
        self.full_ttl = full_ttl;
        self
    }

    /// The `n` highest scores. `force` bypasses the cache.
    pub async fn top_n(&self, n: usize, force: bool) -> Result<Vec<LeaderboardEntry>> {
        let key = top_key(n);
        if !force {
            if let Some(rows) = self.cache.get(&key) {
                return Ok(rows);
            }
        }
        let rows = self.source.top_scores(Some(n)).await?;
        self.cache.set(&key, &rows, self.ttl);
        Ok(rows)
    }

    /// Every ranked row, for the "view all" expansion.
    pub async fn full_ranking(&self, force: bool) -> Result<Vec<LeaderboardEntry>> {
        if !force {
            if let Some(rows) = self.cache.get(FULL_RANKING_KEY) {
                return Ok(rows);
            }
        }
        let rows = self.source.top_scores(None).await?;
        self.cache.set(FULL_RANKING_KEY, &rows, self.full_ttl);
        Ok(rows)
    }

    /// The user's rank and score, or `None` if they have no score yet.
    pub async fn rank_of(&self, user_id: &str, force: bool) -> Result<Option<RankInfo>> {
        let key = rank_key(user_id);
        if !force {
            if let Some(info) = self.cache.get(&key) {
                return Ok(Some(info));
            }
        }

        let Some(score) = self.source.user_score(user_id).await? else {
            self.cache.clear(&key);
            return Ok(None);
        };
        let above = self.source.count_scores_above(score).await?;
        let info = RankInfo {
            rank: above + 1,
            score,
        };
        self.cache.set(&key, &info, self.ttl);
        Ok(Some(info))
    }

    /// The cached rank, without touching the network.
    pub fn cached_rank(&self, user_id: &str) -> Option<RankInfo> {
        self.cache.get(&rank_key(user_id))
    }

    /// Force-refresh the top `n` and the user's rank after a new result was
    /// recorded, and drop the full ranking so it reloads on next view.
    pub async fn refresh_after_commit(&self, user_id: &str, n: usize) -> Result<()> {
        self.cache.clear(FULL_RANKING_KEY);
        let (top, rank) = futures::join!(self.top_n(n, true), self.rank_of(user_id, true));
        top?;
        rank?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::MemoryStore;

    #[derive(Default)]
    struct Table {
        rows: Mutex<Vec<(String, i64)>>,
        top_calls: AtomicU32,
        score_calls: AtomicU32,
    }

    impl Table {
        fn set(&self, user: &str, score: i64) {
            let mut rows = self.rows.lock().unwrap();
            rows.retain(|(u, _)| u != user);
            rows.push((user.to_string(), score));
        }
    }

    #[async_trait]
    impl LeaderboardSource for Table {
        async fn top_scores(&self, limit: Option<usize>) -> Result<Vec<LeaderboardEntry>> {
            self.top_calls.fetch_add(1, Ordering::SeqCst);
            let mut rows = self.rows.lock().unwrap().clone();
            rows.sort_by(|a, b| b.1.cmp(&a.1));
            Ok(rows
                .into_iter()
                .take(limit.unwrap_or(usize::MAX))
                .map(|(user_id, score)| LeaderboardEntry {
                    full_name: user_id.to_uppercase(),
                    user_id,
                    score,
                    training_level: None,
                    district: None,
                    avatar_url: None,
                })
                .collect())
        }

        async fn user_score(&self, user_id: &str) -> Result<Option<i64>> {
            self.score_calls.fetch_add(1, Ordering::SeqCst);
            let rows = self.rows.lock().unwrap();
            Ok(rows.iter().find(|(u, _)| u == user_id).map(|(_, s)| *s))
        }

        async fn count_scores_above(&self, score: i64) -> Result<u64> {
            let rows = self.rows.lock().unwrap();
            Ok(rows.iter().filter(|(_, s)| *s > score).count() as u64)
        }
    }

    fn resolver() -> (Arc<Table>, Arc<ManualClock>, RankResolver) {
        let table = Arc::new(Table::default());
        for (u, s) in [("a", 900), ("b", 700), ("c", 700), ("d", 300)] {
            table.set(u, s);
        }
        let clock = Arc::new(ManualClock::new(0));
        let cache = TtlCache::new(Arc::new(MemoryStore::new()), clock.clone());
        (table.clone(), clock, RankResolver::new(table, cache))
    }

    #[tokio::test]
    async fn rank_counts_strictly_greater_scores() {
        let (_table, _clock, ranks) = resolver();
        assert_eq!(
            ranks.rank_of("b", false).await.unwrap(),
            Some(RankInfo { rank: 2, score: 700 })
        );
        assert_eq!(
            ranks.rank_of("c", false).await.unwrap(),
            Some(RankInfo { rank: 2, score: 700 })
        );
        assert_eq!(ranks.rank_of("d", false).await.unwrap().unwrap().rank, 4);
        assert_eq!(ranks.rank_of("nobody", false).await.unwrap(), None);
    }

    #[tokio::test]
    async fn top_n_is_cached_until_ttl() {
        let (table, clock, ranks) = resolver();
        let top = ranks.top_n(2, false).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].user_id, "a");

        ranks.top_n(2, false).await.unwrap();
        assert_eq!(table.top_calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(5 * 60 + 1));
        ranks.top_n(2, false).await.unwrap();
        assert_eq!(table.top_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn full_ranking_has_its_own_key() {
        let (table, _clock, ranks) = resolver();
        ranks.top_n(3, false).await.unwrap();
        let all = ranks.full_ranking(false).await.unwrap();
        assert_eq!(all.len(), 4);
        ranks.full_ranking(false).await.unwrap();
        assert_eq!(table.top_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refresh_after_commit_bypasses_cache() {
        let (table, _clock, ranks) = resolver();
        ranks.rank_of("d", false).await.unwrap();
        ranks.full_ranking(false).await.unwrap();

        table.set("d", 1000);
        assert_eq!(ranks.cached_rank("d").unwrap().score, 300);

        ranks.refresh_after_commit("d", 3).await.unwrap();
        assert_eq!(ranks.cached_rank("d"), Some(RankInfo { rank: 1, score: 1000 }));
        assert_eq!(ranks.top_n(3, false).await.unwrap()[0].user_id, "d");

        let calls_before = table.top_calls.load(Ordering::SeqCst);
        let all = ranks.full_ranking(false).await.unwrap();
        assert_eq!(all[0].score, 1000);
        assert_eq!(table.top_calls.load(Ordering::SeqCst), calls_before + 1);
    }
}
