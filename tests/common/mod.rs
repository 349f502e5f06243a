#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ingredient_match::normalizer::DEFAULT_INSTRUCTION;
use ingredient_match::recipe_cache::{RecipeCacheEntry, RecipeCacheStats};
use ingredient_match::vector_store::ProductSummary;
use ingredient_match::{
    CacheTtl, Candidate, EmbeddingCache, EmbeddingProvider, EmbeddingVector, EvictionPolicy,
    MatchEngine, MatchSettings, MemoryCatalog, MemoryRecipeCache, ProductRecord, RecipeCacheStore,
    TokenEstimator, VectorStore,
};

pub const DIMS: usize = 3;

/// Embeds by looking up the ingredient part of the composed text.
pub struct KeywordEmbedder {
    vectors: HashMap<String, EmbeddingVector>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl KeywordEmbedder {
    pub fn new(entries: &[(&str, [f32; DIMS])]) -> Self {
        Self {
            vectors: entries
                .iter()
                .map(|(word, vector)| (word.to_string(), vector.to_vec()))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Ingredient parts of every batch received, one entry per call.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

fn ingredient_of(text: &str) -> String {
    text.rsplit("Ingredient: ")
        .next()
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<EmbeddingVector>> {
        let ingredients: Vec<String> = inputs.iter().map(|text| ingredient_of(text)).collect();
        self.calls.lock().unwrap().push(ingredients.clone());
        Ok(ingredients
            .iter()
            .map(|ingredient| {
                self.vectors
                    .get(ingredient)
                    .cloned()
                    .unwrap_or_else(|| vec![0.0, 0.0, 1.0])
            })
            .collect())
    }

    fn dimensions(&self) -> usize {
        DIMS
    }
}

/// Provider that always fails.
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed_batch(&self, _inputs: &[String]) -> Result<Vec<EmbeddingVector>> {
        Err(anyhow!("quota exceeded"))
    }

    fn dimensions(&self) -> usize {
        DIMS
    }
}

/// Provider whose calls never complete.
pub struct StalledEmbedder;

#[async_trait]
impl EmbeddingProvider for StalledEmbedder {
    async fn embed_batch(&self, _inputs: &[String]) -> Result<Vec<EmbeddingVector>> {
        std::future::pending::<Result<Vec<EmbeddingVector>>>().await
    }

    fn dimensions(&self) -> usize {
        DIMS
    }
}

/// Store whose lookups never complete.
pub struct StalledStore;

#[async_trait]
impl VectorStore for StalledStore {
    async fn nearest_batch(
        &self,
        _queries: &[&[f32]],
        _top_k: usize,
        _min_score: Option<f64>,
    ) -> Result<Vec<Vec<Candidate>>> {
        std::future::pending::<Result<Vec<Vec<Candidate>>>>().await
    }

    async fn sample_products(&self, _limit: usize) -> Result<Vec<ProductSummary>> {
        std::future::pending::<Result<Vec<ProductSummary>>>().await
    }
}

/// Store whose lookups always fail.
pub struct BrokenStore;

#[async_trait]
impl VectorStore for BrokenStore {
    async fn nearest_batch(
        &self,
        _queries: &[&[f32]],
        _top_k: usize,
        _min_score: Option<f64>,
    ) -> Result<Vec<Vec<Candidate>>> {
        Err(anyhow!("connection refused"))
    }

    async fn sample_products(&self, _limit: usize) -> Result<Vec<ProductSummary>> {
        Err(anyhow!("connection refused"))
    }
}

/// Recipe cache that fails every operation.
pub struct UnreachableRecipeCache;

#[async_trait]
impl RecipeCacheStore for UnreachableRecipeCache {
    async fn lookup(&self, _slug: &str) -> Result<Option<RecipeCacheEntry>> {
        Err(anyhow!("cache offline"))
    }

    async fn store(&self, _slug: &str, _results: serde_json::Value, _ttl: CacheTtl) -> Result<()> {
        Err(anyhow!("cache offline"))
    }

    async fn purge_expired(&self) -> Result<u64> {
        Err(anyhow!("cache offline"))
    }

    async fn stats(&self) -> Result<RecipeCacheStats> {
        Err(anyhow!("cache offline"))
    }
}

pub fn product(id: &str, title: &str, embedding: Option<[f32; DIMS]>) -> ProductRecord {
    ProductRecord {
        id: id.to_string(),
        title: Some(title.to_string()),
        title_original: Some(title.to_uppercase()),
        embedding: embedding.map(|vector| vector.to_vec()),
    }
}

/// Catalog where `P1` scores 0.97 against `[1, 0, 0]` and `P2` scores 0.
pub fn dairy_catalog() -> MemoryCatalog {
    let p1_tail = (1.0f32 - 0.97 * 0.97).sqrt();
    MemoryCatalog::new(vec![
        product("P1", "Letmælk", Some([0.97, p1_tail, 0.0])),
        product("P2", "Havsalt", Some([0.0, 0.8, 0.6])),
        product("P3", "Rugbrød", Some([0.0, 0.0, 1.0])),
        product("P4", "Uden vektor", None),
    ])
}

pub fn dairy_embedder() -> Arc<KeywordEmbedder> {
    Arc::new(KeywordEmbedder::new(&[
        ("mælk", [1.0, 0.0, 0.0]),
        ("salt", [0.0, 1.0, 0.0]),
        ("rugbrød", [0.0, 0.0, 1.0]),
    ]))
}

pub struct Harness {
    pub engine: Arc<MatchEngine>,
    pub embedder: Arc<KeywordEmbedder>,
    pub recipe_cache: Arc<MemoryRecipeCache>,
}

pub fn harness() -> Harness {
    harness_with(MatchSettings::default())
}

pub fn harness_with(settings: MatchSettings) -> Harness {
    let embedder = dairy_embedder();
    let recipe_cache = Arc::new(MemoryRecipeCache::new());
    let engine = Arc::new(MatchEngine::new(
        embedder.clone(),
        Arc::new(EmbeddingCache::new(64, EvictionPolicy::Fifo)),
        Arc::new(dairy_catalog()),
        recipe_cache.clone(),
        settings,
    ));
    Harness {
        engine,
        embedder,
        recipe_cache,
    }
}

pub fn engine_from(
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    recipe_cache: Arc<dyn RecipeCacheStore>,
) -> Arc<MatchEngine> {
    Arc::new(MatchEngine::new(
        provider,
        Arc::new(EmbeddingCache::new(64, EvictionPolicy::Fifo)),
        store,
        recipe_cache,
        MatchSettings::default(),
    ))
}

/// Shared `cl100k_base` estimator; loading the encoding is the slow part.
pub fn token_estimator() -> Arc<TokenEstimator> {
    static ESTIMATOR: OnceLock<Arc<TokenEstimator>> = OnceLock::new();
    ESTIMATOR
        .get_or_init(|| {
            Arc::new(TokenEstimator::new(DEFAULT_INSTRUCTION).expect("encoding loads"))
        })
        .clone()
}
