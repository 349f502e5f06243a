//! Recipe-level result cache with month-based expiry and hit accounting.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};
use serde::Serialize;

pub mod memory;
pub mod pg;

pub use memory::MemoryRecipeCache;
pub use pg::PgRecipeCache;

/// Default time-to-live for cached recipe runs, in months.
pub const DEFAULT_TTL_MONTHS: u32 = 1;

/// Whole-month lifetime of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtl {
    months: u32,
}

impl CacheTtl {
    /// Lifetime of `months` calendar months.
    pub fn months(months: u32) -> Self {
        Self { months }
    }

    /// Configured number of months.
    pub fn as_months(&self) -> u32 {
        self.months
    }

    /// Expiry for an entry written at `written_at`.
    ///
    /// Day-of-month overflow clamps to the end of the target month, as
    /// `chrono::Months` does.
    pub fn expires_after(&self, written_at: DateTime<Utc>) -> Result<DateTime<Utc>> {
        written_at
            .checked_add_months(Months::new(self.months))
            .ok_or_else(|| anyhow!("cache ttl of {} months overflows", self.months))
    }
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self::months(DEFAULT_TTL_MONTHS)
    }
}

/// Snapshot of a cached recipe run.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeCacheEntry {
    /// Recipe slug (cache key).
    pub slug: String,
    /// Serialized match results.
    pub results: serde_json::Value,
    /// When the entry was last written.
    pub created_at: DateTime<Utc>,
    /// Entry is ignored once `now > expires_at`.
    pub expires_at: DateTime<Utc>,
    /// Hits recorded before the lookup that returned this snapshot.
    pub hit_count: u64,
    /// Time of the most recent hit (or write).
    pub last_accessed_at: DateTime<Utc>,
}

/// Aggregate counters over the whole cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecipeCacheStats {
    /// Rows currently stored, expired or not.
    pub total_entries: u64,
    /// Rows past their expiry awaiting a sweep.
    pub expired_entries: u64,
    /// Sum of hit counters.
    pub total_hits: u64,
    /// Mean hit counter per row.
    pub average_hits: f64,
}

/// Durable keyed storage for recipe runs.
#[async_trait]
pub trait RecipeCacheStore: Send + Sync {
    /// Returns a live entry and records the hit.
    ///
    /// Expired and missing entries both yield `None`. On a hit the stored
    /// counter is incremented and the access time refreshed atomically; the
    /// returned snapshot carries the counter value from before the increment.
    async fn lookup(&self, slug: &str) -> Result<Option<RecipeCacheEntry>>;

    /// Upserts an entry, replacing results and expiry and zeroing the counter.
    async fn store(&self, slug: &str, results: serde_json::Value, ttl: CacheTtl) -> Result<()>;

    /// Physically removes expired entries, returning how many were dropped.
    async fn purge_expired(&self) -> Result<u64>;

    /// Aggregate counters.
    async fn stats(&self) -> Result<RecipeCacheStats>;
}
