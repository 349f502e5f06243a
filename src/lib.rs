#![warn(missing_docs)]
//! Semantic matching of recipe ingredient lines to catalog products.

pub mod acquirer;
pub mod api;
pub mod config;
pub mod embedder;
pub mod embedding_cache;
pub mod embeddings;
pub mod error;
pub mod matcher;
pub mod normalizer;
pub mod orchestrator;
pub mod recipe_cache;
pub mod selector;
pub mod tokens;
pub mod vector_store;

pub use config::{MatchSettings, ServerCli};
pub use embedding_cache::{EmbeddingCache, EvictionPolicy};
pub use embeddings::{EmbeddingProvider, EmbeddingVector, EMBEDDING_DIMENSIONS};
pub use error::MatchError;
pub use normalizer::{IngredientQuery, NormalizedText, TextNormalizer};
pub use orchestrator::{CacheStatus, MatchEngine, MatchRequest, Served};
pub use recipe_cache::{CacheTtl, MemoryRecipeCache, PgRecipeCache, RecipeCacheStore};
pub use selector::{MatchResult, SelectionMode};
pub use tokens::{TokenEstimate, TokenEstimator};
pub use vector_store::{Candidate, MemoryCatalog, PgVectorStore, ProductRecord, TableName, VectorStore};
