//! Similarity matching: batches per-ingredient lookups against the store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tracing::info;

use crate::embeddings::EmbeddingVector;
use crate::error::MatchError;
use crate::vector_store::{Candidate, VectorStore};

/// One ingredient's embedding, tagged with its request position.
#[derive(Debug, Clone)]
pub struct NearestQuery {
    /// Request position of the ingredient.
    pub index: usize,
    /// Ingredient embedding; empty means no lookup.
    pub embedding: EmbeddingVector,
}

/// Ranked candidates keyed by request position.
pub type RankedCandidates = BTreeMap<usize, Vec<Candidate>>;

/// Turns per-ingredient vectors into ranked candidate lists.
pub struct SimilarityMatcher {
    store: Arc<dyn VectorStore>,
    timeout: Duration,
}

impl SimilarityMatcher {
    /// Wraps a store with a per-batch timeout.
    pub fn new(store: Arc<dyn VectorStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Underlying catalog store.
    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Looks up every query with a non-empty embedding in one store round trip.
    ///
    /// Every query index appears in the result; empty embeddings map to an
    /// empty list without touching the store.
    pub async fn find_matches(
        &self,
        queries: &[NearestQuery],
        top_k: usize,
        min_score: Option<f64>,
    ) -> Result<RankedCandidates, MatchError> {
        let mut ranked: RankedCandidates = queries
            .iter()
            .map(|query| (query.index, Vec::new()))
            .collect();
        let lookups: Vec<&NearestQuery> = queries
            .iter()
            .filter(|query| !query.embedding.is_empty())
            .collect();
        if lookups.is_empty() || top_k == 0 {
            return Ok(ranked);
        }

        let vectors: Vec<&[f32]> = lookups
            .iter()
            .map(|query| query.embedding.as_slice())
            .collect();
        let started = Instant::now();
        let batches = tokio::time::timeout(
            self.timeout,
            self.store.nearest_batch(&vectors, top_k, min_score),
        )
        .await
        .map_err(|_| {
            MatchError::VectorStore(anyhow!(
                "nearest-neighbor batch timed out after {:?}",
                self.timeout
            ))
        })?
        .map_err(MatchError::VectorStore)?;

        if batches.len() != lookups.len() {
            return Err(MatchError::VectorStore(anyhow!(
                "store answered {} lookups for {} queries",
                batches.len(),
                lookups.len()
            )));
        }
        for (query, mut candidates) in lookups.into_iter().zip(batches) {
            candidates.truncate(top_k);
            ranked.insert(query.index, candidates);
        }
        info!(
            lookups = vectors.len(),
            top_k,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "nearest-neighbor batch complete"
        );
        Ok(ranked)
    }
}
