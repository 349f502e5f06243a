//! Error taxonomy surfaced by the matching engine.

use thiserror::Error;

/// Failures that abort a match request.
///
/// Recipe cache failures never appear here: the cache is an optimization, so
/// read and write errors are logged and the request carries on.
#[derive(Debug, Error)]
pub enum MatchError {
    /// The caller sent an empty or malformed ingredient list.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The embedding provider failed or answered with a malformed payload.
    #[error("embedding provider error: {0:#}")]
    EmbeddingProvider(anyhow::Error),

    /// The vector store failed to build or run a nearest-neighbor batch.
    #[error("vector store error: {0:#}")]
    VectorStore(anyhow::Error),

    /// Anything else, e.g. a cached payload that no longer deserializes.
    #[error("internal error: {0:#}")]
    Internal(anyhow::Error),
}

impl MatchError {
    /// Stable machine-readable code reported in error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            MatchError::InvalidInput(_) => "INVALID_INPUT",
            MatchError::EmbeddingProvider(_) => "EMBEDDING_ERROR",
            MatchError::VectorStore(_) => "DATABASE_ERROR",
            MatchError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
