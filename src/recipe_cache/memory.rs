//! In-process recipe cache.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{CacheTtl, RecipeCacheEntry, RecipeCacheStats, RecipeCacheStore};

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Recipe cache held in a mutex-guarded map.
pub struct MemoryRecipeCache {
    entries: Mutex<HashMap<String, RecipeCacheEntry>>,
    clock: Clock,
}

impl MemoryRecipeCache {
    /// Empty cache on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(Utc::now))
    }

    /// Empty cache reading time from `clock`.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of stored entries, expired or not.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryRecipeCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecipeCacheStore for MemoryRecipeCache {
    async fn lookup(&self, slug: &str) -> Result<Option<RecipeCacheEntry>> {
        let now = (self.clock)();
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(slug) else {
            return Ok(None);
        };
        if now > entry.expires_at {
            return Ok(None);
        }
        let snapshot_hits = entry.hit_count;
        entry.hit_count += 1;
        entry.last_accessed_at = now;
        Ok(Some(RecipeCacheEntry {
            hit_count: snapshot_hits,
            ..entry.clone()
        }))
    }

    async fn store(&self, slug: &str, results: serde_json::Value, ttl: CacheTtl) -> Result<()> {
        let now = (self.clock)();
        let expires_at = ttl.expires_after(now)?;
        self.entries.lock().await.insert(
            slug.to_string(),
            RecipeCacheEntry {
                slug: slug.to_string(),
                results,
                created_at: now,
                expires_at,
                hit_count: 0,
                last_accessed_at: now,
            },
        );
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = (self.clock)();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at >= now);
        Ok((before - entries.len()) as u64)
    }

    async fn stats(&self) -> Result<RecipeCacheStats> {
        let now = (self.clock)();
        let entries = self.entries.lock().await;
        let total_entries = entries.len() as u64;
        let expired_entries = entries
            .values()
            .filter(|entry| entry.expires_at < now)
            .count() as u64;
        let total_hits: u64 = entries.values().map(|entry| entry.hit_count).sum();
        let average_hits = if total_entries == 0 {
            0.0
        } else {
            total_hits as f64 / total_entries as f64
        };
        Ok(RecipeCacheStats {
            total_entries,
            expired_entries,
            total_hits,
            average_hits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn manual_clock(start: DateTime<Utc>) -> (Clock, Arc<StdMutex<DateTime<Utc>>>) {
        let now = Arc::new(StdMutex::new(start));
        let handle = Arc::clone(&now);
        let clock: Clock = Arc::new(move || *handle.lock().unwrap());
        (clock, now)
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn hits_report_previous_count_and_increment() {
        let cache = MemoryRecipeCache::new();
        cache
            .store("boller", json!([{"ingredient": "mel"}]), CacheTtl::default())
            .await
            .unwrap();

        let first = cache.lookup("boller").await.unwrap().expect("hit");
        let second = cache.lookup("boller").await.unwrap().expect("hit");
        assert_eq!(first.hit_count, 0);
        assert_eq!(second.hit_count, 1);
        assert_eq!(second.results, json!([{"ingredient": "mel"}]));
        assert_eq!(cache.stats().await.unwrap().total_hits, 2);
    }

    #[tokio::test]
    async fn missing_slug_is_a_miss() {
        let cache = MemoryRecipeCache::new();
        assert!(cache.lookup("ukendt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_invisible_then_purged() {
        let (clock, now) = manual_clock(start());
        let cache = MemoryRecipeCache::with_clock(clock);
        cache
            .store("suppe", json!([]), CacheTtl::months(1))
            .await
            .unwrap();

        *now.lock().unwrap() = start() + Duration::days(31);
        assert!(cache.lookup("suppe").await.unwrap().is_some());

        *now.lock().unwrap() = start() + Duration::days(32);
        assert!(cache.lookup("suppe").await.unwrap().is_none());
        assert_eq!(cache.stats().await.unwrap().expired_entries, 1);
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn rewrite_replaces_results_and_resets_hits() {
        let (clock, now) = manual_clock(start());
        let cache = MemoryRecipeCache::with_clock(clock);
        cache.store("kage", json!(["v1"]), CacheTtl::months(1)).await.unwrap();
        cache.lookup("kage").await.unwrap();
        cache.lookup("kage").await.unwrap();

        *now.lock().unwrap() = start() + Duration::days(10);
        cache.store("kage", json!(["v2"]), CacheTtl::months(2)).await.unwrap();
        let entry = cache.lookup("kage").await.unwrap().expect("hit");
        assert_eq!(entry.hit_count, 0);
        assert_eq!(entry.results, json!(["v2"]));
        assert_eq!(entry.created_at, start() + Duration::days(10));
        assert_eq!(
            entry.expires_at,
            Utc.with_ymd_and_hms(2025, 3, 20, 9, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn stats_average_hits() {
        let cache = MemoryRecipeCache::new();
        cache.store("a", json!([]), CacheTtl::default()).await.unwrap();
        cache.store("b", json!([]), CacheTtl::default()).await.unwrap();
        cache.lookup("a").await.unwrap();
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.total_hits, 1);
        assert!((stats.average_hits - 0.5).abs() < f64::EPSILON);
    }
}
