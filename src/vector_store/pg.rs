//! pgvector-backed catalog store.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use pgvector::Vector;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Row};

use super::{Candidate, ProductSummary, TableName, VectorStore};

/// Catalog store issuing batched `UNION ALL` nearest-neighbor queries.
#[derive(Clone)]
pub struct PgVectorStore {
    client: Arc<Client>,
    table: TableName,
    dimensions: usize,
}

impl PgVectorStore {
    /// Wraps a connected client and the products table.
    pub fn new(client: Arc<Client>, table: TableName, dimensions: usize) -> Self {
        Self {
            client,
            table,
            dimensions,
        }
    }

    /// Products table queried by this store.
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Creates the pgvector extension, products table and cosine index.
    pub async fn prepare_schema(&self) -> Result<()> {
        ensure_vector_extension(&self.client).await?;
        ensure_products_table(&self.client, &self.table, self.dimensions).await?;
        ensure_embedding_index(&self.client, &self.table).await
    }

    fn validate(&self, queries: &[&[f32]]) -> Result<()> {
        for (position, vector) in queries.iter().enumerate() {
            anyhow::ensure!(
                vector.len() == self.dimensions,
                "query {} has {} dimensions, catalog expects {}",
                position,
                vector.len(),
                self.dimensions
            );
            anyhow::ensure!(
                vector.iter().all(|value| value.is_finite()),
                "query {} contains non-finite values",
                position
            );
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn nearest_batch(
        &self,
        queries: &[&[f32]],
        top_k: usize,
        min_score: Option<f64>,
    ) -> Result<Vec<Vec<Candidate>>> {
        if queries.is_empty() || top_k == 0 {
            return Ok(vec![Vec::new(); queries.len()]);
        }
        // A bad sub-query rejects the batch before anything is sent.
        self.validate(queries)?;

        let sql = nearest_batch_sql(&self.table, queries.len(), min_score.is_some());
        let limit = i64::try_from(top_k).map_err(|_| anyhow!("top_k {} exceeds i64 range", top_k))?;
        let vectors: Vec<Vector> = queries
            .iter()
            .map(|values| Vector::from(values.to_vec()))
            .collect();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(vectors.len() + 2);
        params.push(&limit);
        if let Some(threshold) = min_score.as_ref() {
            params.push(threshold);
        }
        for vector in &vectors {
            params.push(vector);
        }

        let rows = self
            .client
            .query(sql.as_str(), &params)
            .await
            .with_context(|| {
                format!(
                    "nearest-neighbor batch of {} queries against {} failed",
                    queries.len(),
                    self.table.qualified()
                )
            })?;
        demultiplex(rows, queries.len())
    }

    async fn sample_products(&self, limit: usize) -> Result<Vec<ProductSummary>> {
        let sql = format!(
            "SELECT COALESCE(pimid, id_text) AS product_id, title, (embedding IS NOT NULL) AS has_embedding \
             FROM {} ORDER BY id_text LIMIT $1",
            self.table.qualified()
        );
        let limit = i64::try_from(limit).map_err(|_| anyhow!("limit {} exceeds i64 range", limit))?;
        let rows = self
            .client
            .query(sql.as_str(), &[&limit])
            .await
            .context("failed to list catalog products")?;
        Ok(rows
            .iter()
            .map(|row| ProductSummary {
                id: row.get("product_id"),
                title: row.get("title"),
                has_embedding: row.get("has_embedding"),
            })
            .collect())
    }
}

/// Builds the batched lookup statement.
///
/// Parameter layout: `$1` is the per-query limit, `$2` the minimum score when
/// `with_min_score` is set, then one `vector` parameter per query.
pub fn nearest_batch_sql(table: &TableName, query_count: usize, with_min_score: bool) -> String {
    let qualified = table.qualified();
    let first_vector = if with_min_score { 3 } else { 2 };
    let branches: Vec<String> = (0..query_count)
        .map(|query_index| {
            let vector = format!("${}", first_vector + query_index);
            let score_filter = if with_min_score {
                format!(" AND 1 - (embedding <=> {vector}) >= $2")
            } else {
                String::new()
            };
            format!(
                "(SELECT {query_index}::INT4 AS query_index, \
                    COALESCE(pimid, id_text) AS product_id, \
                    title, \
                    title_original, \
                    embedding <=> {vector} AS distance, \
                    1 - (embedding <=> {vector}) AS score \
                FROM {qualified} \
                WHERE embedding IS NOT NULL{score_filter} \
                ORDER BY embedding <=> {vector} \
                LIMIT $1)"
            )
        })
        .collect();
    format!(
        "SELECT query_index, product_id, title, title_original, score \
        FROM ({}) AS batched \
        ORDER BY query_index, distance",
        branches.join(" UNION ALL ")
    )
}

fn demultiplex(rows: Vec<Row>, query_count: usize) -> Result<Vec<Vec<Candidate>>> {
    let mut out = vec![Vec::new(); query_count];
    for row in rows {
        let query_index: i32 = row.get("query_index");
        let slot = usize::try_from(query_index)
            .ok()
            .and_then(|idx| out.get_mut(idx))
            .ok_or_else(|| anyhow!("row references unknown query {}", query_index))?;
        slot.push(Candidate {
            product_id: row.get("product_id"),
            title: row.get("title"),
            title_original: row.get("title_original"),
            score: row.get("score"),
        });
    }
    Ok(out)
}

async fn ensure_vector_extension(client: &Client) -> Result<()> {
    client
        .execute("CREATE EXTENSION IF NOT EXISTS vector", &[])
        .await
        .context("failed to ensure pgvector extension")?;
    Ok(())
}

async fn ensure_products_table(client: &Client, table: &TableName, dims: usize) -> Result<()> {
    anyhow::ensure!(dims > 0, "embedding dimension must be positive");
    let ddl = format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id_text TEXT PRIMARY KEY,
            title TEXT,
            title_original TEXT,
            pimid TEXT,
            raw JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            embedding VECTOR({dims})
        )",
        table.qualified()
    );
    client
        .execute(&ddl, &[])
        .await
        .context("failed to create products table")?;
    Ok(())
}

async fn ensure_embedding_index(client: &Client, table: &TableName) -> Result<()> {
    let sql = format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)",
        table.index_name("embedding_idx"),
        table.qualified()
    );
    client
        .execute(&sql, &[])
        .await
        .context("failed to ensure embedding ivfflat index")?;
    Ok(())
}
