//! Request orchestration for the full and production match modes.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::acquirer::EmbeddingAcquirer;
use crate::config::MatchSettings;
use crate::embedding_cache::EmbeddingCache;
use crate::embeddings::EmbeddingProvider;
use crate::error::MatchError;
use crate::matcher::{NearestQuery, SimilarityMatcher};
use crate::normalizer::{IngredientQuery, TextNormalizer};
use crate::recipe_cache::RecipeCacheStore;
use crate::selector::{self, MatchResult, SelectionMode};
use crate::vector_store::VectorStore;

/// Body accepted by both match endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRequest {
    /// Raw ingredient lines.
    #[serde(default)]
    pub ingredients: Vec<String>,
    /// Extra guidance composed into every embedding input.
    #[serde(default)]
    pub instructions: Option<String>,
    /// Stable recipe identifier enabling the recipe cache.
    #[serde(default)]
    pub recipe_slug: Option<String>,
}

impl MatchRequest {
    /// Request for `ingredients` without instructions or slug.
    pub fn new<I, S>(ingredients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ingredients: ingredients.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Attaches a recipe slug.
    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.recipe_slug = Some(slug.into());
        self
    }

    /// Attaches free-text instructions.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

/// Whether a response came from the recipe cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from cache; `hits` is the count recorded before this hit.
    Hit {
        /// Prior hits on the entry.
        hits: u64,
    },
    /// Computed for this request.
    Miss,
}

/// Response payload tagged with its cache provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Served<T> {
    /// Response payload.
    pub value: T,
    /// Cache provenance.
    pub cache: CacheStatus,
}

impl<T> Served<T> {
    /// Maps the payload, keeping the cache tag.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Served<U> {
        Served {
            value: f(self.value),
            cache: self.cache,
        }
    }
}

/// Composes normalization, embedding, matching, selection and caching.
pub struct MatchEngine {
    normalizer: TextNormalizer,
    acquirer: EmbeddingAcquirer,
    matcher: SimilarityMatcher,
    recipe_cache: Arc<dyn RecipeCacheStore>,
    settings: MatchSettings,
}

impl MatchEngine {
    /// Wires the engine from its collaborators.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        embedding_cache: Arc<EmbeddingCache>,
        store: Arc<dyn VectorStore>,
        recipe_cache: Arc<dyn RecipeCacheStore>,
        settings: MatchSettings,
    ) -> Self {
        Self {
            normalizer: TextNormalizer::new(settings.default_instruction()),
            acquirer: EmbeddingAcquirer::new(provider, embedding_cache, settings.embedding_timeout()),
            matcher: SimilarityMatcher::new(store, settings.store_timeout()),
            recipe_cache,
            settings,
        }
    }

    /// Settings in effect.
    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    /// Catalog store behind the matcher.
    pub fn store(&self) -> &Arc<dyn VectorStore> {
        self.matcher.store()
    }

    /// Up to three ranked candidates per ingredient.
    pub async fn match_full(
        &self,
        request: &MatchRequest,
    ) -> Result<Served<Vec<MatchResult>>, MatchError> {
        self.run(request, SelectionMode::Full).await
    }

    /// IDs of confident best matches, in ingredient order.
    pub async fn match_production(
        &self,
        request: &MatchRequest,
    ) -> Result<Served<Vec<String>>, MatchError> {
        let mode = SelectionMode::BestOnly {
            threshold: self.settings.production_threshold(),
        };
        let served = self.run(request, mode).await?;
        Ok(served.map(|results| selector::accepted_ids(&results)))
    }

    async fn run(
        &self,
        request: &MatchRequest,
        mode: SelectionMode,
    ) -> Result<Served<Vec<MatchResult>>, MatchError> {
        self.validate(request)?;
        let started = Instant::now();
        let cache_key = request
            .recipe_slug
            .as_deref()
            .map(str::trim)
            .filter(|slug| !slug.is_empty())
            .map(|slug| recipe_cache_key(slug, mode));

        if let Some(key) = &cache_key {
            if let Some(served) = self.cached(key).await {
                info!(
                    mode = mode.label(),
                    slug = %key,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "served from recipe cache"
                );
                return Ok(served);
            }
        }

        let queries = IngredientQuery::from_list(&request.ingredients);
        let normalized = self
            .normalizer
            .normalize_all(&queries, request.instructions.as_deref());
        let embeddings = self.acquirer.resolve(&normalized).await?;
        let lookups: Vec<NearestQuery> = queries
            .iter()
            .zip(embeddings)
            .map(|(query, embedding)| NearestQuery {
                index: query.index,
                embedding,
            })
            .collect();
        let ranked = self
            .matcher
            .find_matches(&lookups, mode.top_k(), mode.min_score())
            .await?;
        let results = selector::select(&queries, ranked, mode);

        if let Some(key) = &cache_key {
            self.remember(key, &results).await;
        }
        info!(
            mode = mode.label(),
            ingredients = queries.len(),
            matched = results.iter().filter(|r| !r.matches.is_empty()).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "match run complete"
        );
        Ok(Served {
            value: results,
            cache: CacheStatus::Miss,
        })
    }

    fn validate(&self, request: &MatchRequest) -> Result<(), MatchError> {
        if request.ingredients.is_empty() {
            return Err(MatchError::InvalidInput(
                "ingredients must be a non-empty list".to_string(),
            ));
        }
        let max = self.settings.max_ingredients();
        if request.ingredients.len() > max {
            return Err(MatchError::InvalidInput(format!(
                "{} ingredients exceed the limit of {}",
                request.ingredients.len(),
                max
            )));
        }
        Ok(())
    }

    async fn cached(&self, key: &str) -> Option<Served<Vec<MatchResult>>> {
        let entry = match self.recipe_cache.lookup(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!(slug = %key, "recipe cache miss");
                return None;
            }
            Err(err) => {
                warn!(slug = %key, error = %format!("{err:#}"), "recipe cache read failed");
                return None;
            }
        };
        match serde_json::from_value::<Vec<MatchResult>>(entry.results) {
            Ok(results) => Some(Served {
                value: results,
                cache: CacheStatus::Hit {
                    hits: entry.hit_count,
                },
            }),
            Err(err) => {
                warn!(slug = %key, error = %err, "cached recipe payload unreadable, recomputing");
                None
            }
        }
    }

    async fn remember(&self, key: &str, results: &[MatchResult]) {
        if let Err(err) = self.write_cache(key, results).await {
            warn!(slug = %key, error = %format!("{err:#}"), "recipe cache write failed");
        }
    }

    async fn write_cache(&self, key: &str, results: &[MatchResult]) -> anyhow::Result<()> {
        let payload = serde_json::to_value(results).context("failed to encode match results")?;
        self.recipe_cache
            .store(key, payload, self.settings.cache_ttl())
            .await
    }
}

/// Recipe cache key for a slug under a given mode.
pub fn recipe_cache_key(slug: &str, mode: SelectionMode) -> String {
    match mode {
        SelectionMode::Full => slug.to_string(),
        SelectionMode::BestOnly { .. } => format!("{slug}#production"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_keys_are_namespaced_by_mode() {
        assert_eq!(recipe_cache_key("lasagne", SelectionMode::Full), "lasagne");
        assert_eq!(
            recipe_cache_key("lasagne", SelectionMode::BestOnly { threshold: 0.95 }),
            "lasagne#production"
        );
    }

    #[test]
    fn request_deserializes_camel_case() {
        let request: MatchRequest = serde_json::from_str(
            r#"{"ingredients": ["tomat"], "instructions": "frisk", "recipeSlug": "salat"}"#,
        )
        .expect("parses");
        assert_eq!(request.ingredients, vec!["tomat".to_string()]);
        assert_eq!(request.instructions.as_deref(), Some("frisk"));
        assert_eq!(request.recipe_slug.as_deref(), Some("salat"));
    }

    #[test]
    fn served_map_keeps_cache_tag() {
        let served = Served {
            value: 2,
            cache: CacheStatus::Hit { hits: 4 },
        };
        let mapped = served.map(|v| v * 10);
        assert_eq!(mapped.value, 20);
        assert_eq!(mapped.cache, CacheStatus::Hit { hits: 4 });
    }
}
