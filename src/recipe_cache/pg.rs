//! Postgres-backed recipe cache.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::types::Json;
use tokio_postgres::Client;

use super::{CacheTtl, RecipeCacheEntry, RecipeCacheStats, RecipeCacheStore};
use crate::vector_store::TableName;

/// Recipe cache stored in a `recipe_cache` style table.
#[derive(Clone)]
pub struct PgRecipeCache {
    client: Arc<Client>,
    table: TableName,
}

impl PgRecipeCache {
    /// Wraps a connected client and the cache table.
    pub fn new(client: Arc<Client>, table: TableName) -> Self {
        Self { client, table }
    }

    /// Creates the cache table and its expiry index if missing.
    pub async fn prepare_schema(&self) -> Result<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                recipe_slug TEXT PRIMARY KEY,
                results JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                expires_at TIMESTAMPTZ NOT NULL,
                hit_count BIGINT NOT NULL DEFAULT 0,
                last_accessed TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            self.table.qualified()
        );
        self.client
            .execute(&ddl, &[])
            .await
            .context("failed to create recipe cache table")?;
        let index = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (expires_at)",
            self.table.index_name("expires_at_idx"),
            self.table.qualified()
        );
        self.client
            .execute(&index, &[])
            .await
            .context("failed to ensure recipe cache expiry index")?;
        Ok(())
    }
}

#[async_trait]
impl RecipeCacheStore for PgRecipeCache {
    async fn lookup(&self, slug: &str) -> Result<Option<RecipeCacheEntry>> {
        // Single statement: the read, the expiry check and the hit bump
        // cannot interleave with a concurrent writer.
        let sql = format!(
            "UPDATE {} \
                SET hit_count = hit_count + 1, last_accessed = NOW() \
                WHERE recipe_slug = $1 AND expires_at >= NOW() \
                RETURNING recipe_slug, results, created_at, expires_at, \
                    hit_count - 1 AS previous_hits, last_accessed",
            self.table.qualified()
        );
        let row = self
            .client
            .query_opt(sql.as_str(), &[&slug])
            .await
            .with_context(|| format!("failed to read recipe cache entry {slug}"))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let Json(results): Json<serde_json::Value> = row.get("results");
        let previous_hits: i64 = row.get("previous_hits");
        Ok(Some(RecipeCacheEntry {
            slug: row.get("recipe_slug"),
            results,
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
            hit_count: u64::try_from(previous_hits)
                .map_err(|_| anyhow!("negative hit count {} for {}", previous_hits, slug))?,
            last_accessed_at: row.get("last_accessed"),
        }))
    }

    async fn store(&self, slug: &str, results: serde_json::Value, ttl: CacheTtl) -> Result<()> {
        let now: DateTime<Utc> = Utc::now();
        let expires_at = ttl.expires_after(now)?;
        let sql = format!(
            "INSERT INTO {} \
                (recipe_slug, results, created_at, expires_at, hit_count, last_accessed) \
                VALUES ($1, $2, $3, $4, 0, $3) \
                ON CONFLICT (recipe_slug) DO UPDATE SET \
                    results = EXCLUDED.results, \
                    created_at = EXCLUDED.created_at, \
                    expires_at = EXCLUDED.expires_at, \
                    hit_count = 0, \
                    last_accessed = EXCLUDED.last_accessed",
            self.table.qualified()
        );
        let payload = Json(results);
        self.client
            .execute(sql.as_str(), &[&slug, &payload, &now, &expires_at])
            .await
            .with_context(|| format!("failed to write recipe cache entry {slug}"))?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE expires_at < NOW()",
            self.table.qualified()
        );
        self.client
            .execute(sql.as_str(), &[])
            .await
            .context("failed to purge expired recipe cache entries")
    }

    async fn stats(&self) -> Result<RecipeCacheStats> {
        let sql = format!(
            "SELECT \
                COUNT(*) AS total_entries, \
                COUNT(*) FILTER (WHERE expires_at < NOW()) AS expired_entries, \
                COALESCE(SUM(hit_count), 0)::BIGINT AS total_hits, \
                COALESCE(AVG(hit_count), 0)::FLOAT8 AS average_hits \
            FROM {}",
            self.table.qualified()
        );
        let row = self
            .client
            .query_one(sql.as_str(), &[])
            .await
            .context("failed to read recipe cache stats")?;
        let total_entries: i64 = row.get("total_entries");
        let expired_entries: i64 = row.get("expired_entries");
        let total_hits: i64 = row.get("total_hits");
        Ok(RecipeCacheStats {
            total_entries: total_entries.max(0) as u64,
            expired_entries: expired_entries.max(0) as u64,
            total_hits: total_hits.max(0) as u64,
            average_hits: row.get("average_hits"),
        })
    }
}
