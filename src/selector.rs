//! Reduces ranked candidates to the response shape of a request mode.

use serde::{Deserialize, Serialize};

use crate::matcher::RankedCandidates;
use crate::normalizer::IngredientQuery;
use crate::vector_store::Candidate;

/// Candidates returned per ingredient in full mode.
pub const FULL_TOP_K: usize = 3;
/// Candidates considered per ingredient in production mode.
pub const BEST_ONLY_TOP_K: usize = 1;
/// Default minimum score for a production match.
pub const DEFAULT_PRODUCTION_THRESHOLD: f64 = 0.95;

/// Matches for one ingredient, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Ingredient text as sent by the caller.
    pub ingredient: String,
    /// Ranked candidates.
    pub matches: Vec<Candidate>,
}

/// Request mode deciding how candidates are reduced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionMode {
    /// Up to [`FULL_TOP_K`] candidates per ingredient, unfiltered.
    Full,
    /// The top candidate only, and only when it reaches `threshold`.
    BestOnly {
        /// Inclusive minimum score.
        threshold: f64,
    },
}

impl SelectionMode {
    /// Candidates to request from the store per ingredient.
    pub fn top_k(&self) -> usize {
        match self {
            SelectionMode::Full => FULL_TOP_K,
            SelectionMode::BestOnly { .. } => BEST_ONLY_TOP_K,
        }
    }

    /// Score floor pushed down to the store.
    pub fn min_score(&self) -> Option<f64> {
        match self {
            SelectionMode::Full => None,
            SelectionMode::BestOnly { threshold } => Some(*threshold),
        }
    }

    /// Short label used in logs and cache keys.
    pub fn label(&self) -> &'static str {
        match self {
            SelectionMode::Full => "full",
            SelectionMode::BestOnly { .. } => "production",
        }
    }
}

/// Builds one [`MatchResult`] per query, in query order.
pub fn select(
    queries: &[IngredientQuery],
    mut ranked: RankedCandidates,
    mode: SelectionMode,
) -> Vec<MatchResult> {
    queries
        .iter()
        .map(|query| {
            let candidates = ranked.remove(&query.index).unwrap_or_default();
            let matches = match mode {
                SelectionMode::Full => candidates.into_iter().take(FULL_TOP_K).collect(),
                SelectionMode::BestOnly { threshold } => candidates
                    .into_iter()
                    .next()
                    .filter(|best| best.score >= threshold)
                    .into_iter()
                    .collect(),
            };
            MatchResult {
                ingredient: query.raw_text.clone(),
                matches,
            }
        })
        .collect()
}

/// Product IDs of accepted matches, in ingredient order.
///
/// Ingredients without a match contribute nothing; the same product may
/// appear more than once.
pub fn accepted_ids(results: &[MatchResult]) -> Vec<String> {
    results
        .iter()
        .filter_map(|result| result.matches.first())
        .map(|candidate| candidate.product_id.clone())
        .collect()
}
