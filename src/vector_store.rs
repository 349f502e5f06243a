//! Catalog vector store seam plus shared pgvector table helpers.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod memory;
pub mod pg;

pub use memory::MemoryCatalog;
pub use pg::PgVectorStore;

/// Ranked catalog hit for one ingredient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Product identifier reported to callers.
    #[serde(rename = "id")]
    pub product_id: String,
    /// Display title, if the catalog has one.
    pub title: Option<String>,
    /// Title as received from the upstream feed.
    pub title_original: Option<String>,
    /// Cosine similarity to the ingredient embedding.
    pub score: f64,
}

/// Catalog row as held by the vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    /// Product identifier.
    pub id: String,
    /// Display title.
    pub title: Option<String>,
    /// Upstream title.
    pub title_original: Option<String>,
    /// Embedding; rows without one never match.
    pub embedding: Option<Vec<f32>>,
}

/// Lightweight catalog listing entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSummary {
    /// Product identifier.
    pub id: String,
    /// Display title.
    pub title: Option<String>,
    /// Whether the row can take part in matching.
    pub has_embedding: bool,
}

/// Nearest-neighbor provider over the product catalog.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Runs one lookup per query vector as a single batch.
    ///
    /// Returns one candidate list per query, in query order, each ranked by
    /// ascending cosine distance, truncated to `top_k` and, when `min_score`
    /// is set, stripped of candidates scoring below it.
    async fn nearest_batch(
        &self,
        queries: &[&[f32]],
        top_k: usize,
        min_score: Option<f64>,
    ) -> Result<Vec<Vec<Candidate>>>;

    /// First `limit` catalog rows, for inspection.
    async fn sample_products(&self, limit: usize) -> Result<Vec<ProductSummary>>;
}

/// Fully-qualified Postgres table name (schema + table).
#[derive(Debug, Clone)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    /// Builds a new table identifier.
    pub fn new<S, T>(schema: S, table: T) -> Result<Self>
    where
        S: Into<String>,
        T: Into<String>,
    {
        let schema = schema.into();
        let table = table.into();
        anyhow::ensure!(!schema.trim().is_empty(), "schema name is required");
        anyhow::ensure!(!table.trim().is_empty(), "table name is required");
        Ok(Self { schema, table })
    }

    /// Fully-qualified table reference with quoted identifiers.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    /// Returns the raw schema string.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Returns the raw table string.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Index name derived from schema, table and a suffix.
    pub fn index_name(&self, suffix: &str) -> String {
        format!(
            "{}_{}_{}",
            sanitize_ident(&self.schema),
            sanitize_ident(&self.table),
            sanitize_ident(suffix)
        )
    }
}

/// Quotes Postgres identifiers, escaping embedded quotes.
pub fn quote_ident(input: &str) -> String {
    let escaped = input.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

fn sanitize_ident(input: &str) -> String {
    input
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}
