//! Shared embedding types and the provider seam.

use anyhow::Result;
use async_trait::async_trait;

/// Dimension of `text-embedding-3-small` vectors stored in the catalog.
pub const EMBEDDING_DIMENSIONS: usize = 1536;

/// Model vector; the empty vector means "no embedding available".
pub type EmbeddingVector = Vec<f32>;

/// External service that turns text into embedding vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds every input in a single upstream call.
    ///
    /// Implementations return one vector per input, in input order, or fail
    /// the whole batch.
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<EmbeddingVector>>;

    /// Dimension of the vectors this provider produces.
    fn dimensions(&self) -> usize;
}
