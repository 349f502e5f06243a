//! Runtime settings for the matching engine and the CLI that fills them.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use crate::embedding_cache::EvictionPolicy;
use crate::normalizer::DEFAULT_INSTRUCTION;
use crate::recipe_cache::{CacheTtl, DEFAULT_TTL_MONTHS};
use crate::selector::DEFAULT_PRODUCTION_THRESHOLD;
use crate::vector_store::TableName;

/// Upper bound on ingredients per request unless configured otherwise.
pub const DEFAULT_MAX_INGREDIENTS: usize = 256;

/// Tunable knobs that bound matching behavior.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchSettings {
    production_threshold: f64,
    cache_ttl: CacheTtl,
    max_ingredients: usize,
    embedding_timeout: Duration,
    store_timeout: Duration,
    default_instruction: String,
}

impl MatchSettings {
    /// Minimum score accepted by production matching.
    pub fn production_threshold(&self) -> f64 {
        self.production_threshold
    }

    /// Lifetime of recipe cache entries.
    pub fn cache_ttl(&self) -> CacheTtl {
        self.cache_ttl
    }

    /// Maximum ingredients accepted per request.
    pub fn max_ingredients(&self) -> usize {
        self.max_ingredients
    }

    /// Upper bound on one embedding provider call.
    pub fn embedding_timeout(&self) -> Duration {
        self.embedding_timeout
    }

    /// Upper bound on one vector store batch.
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// Instruction prepended to every ingredient.
    pub fn default_instruction(&self) -> &str {
        &self.default_instruction
    }

    /// Overrides the production threshold.
    pub fn with_production_threshold(mut self, threshold: f64) -> Self {
        self.production_threshold = threshold;
        self
    }

    /// Overrides the recipe cache lifetime.
    pub fn with_cache_ttl(mut self, ttl: CacheTtl) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Overrides the ingredient limit.
    pub fn with_max_ingredients(mut self, max: usize) -> Self {
        self.max_ingredients = max;
        self
    }

    /// Overrides both dependency timeouts.
    pub fn with_timeouts(mut self, embedding: Duration, store: Duration) -> Self {
        self.embedding_timeout = embedding;
        self.store_timeout = store;
        self
    }
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            production_threshold: DEFAULT_PRODUCTION_THRESHOLD,
            cache_ttl: CacheTtl::default(),
            max_ingredients: DEFAULT_MAX_INGREDIENTS,
            embedding_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(10),
            default_instruction: DEFAULT_INSTRUCTION.to_string(),
        }
    }
}

/// Command-line interface for the matching API server.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "match-api",
    about = "HTTP API matching recipe ingredients to catalog products"
)]
pub struct ServerCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "MATCH_BIND", default_value = "127.0.0.1:8080")]
    pub bind: String,

    /// Postgres connection string (postgres://...).
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Schema holding the catalog and cache tables.
    #[arg(long, env = "MATCH_SCHEMA", default_value = "public")]
    pub schema: String,

    /// Table storing catalog products and their embeddings.
    #[arg(long, env = "MATCH_PRODUCTS_TABLE", default_value = "products")]
    pub products_table: String,

    /// Table storing cached recipe runs.
    #[arg(long, env = "MATCH_RECIPE_CACHE_TABLE", default_value = "recipe_cache")]
    pub recipe_cache_table: String,

    /// Create the vector extension and tables automatically if missing.
    #[arg(long, env = "MATCH_PREPARE_SCHEMA", default_value_t = true, action = clap::ArgAction::Set)]
    pub prepare_schema: bool,

    /// OpenAI API key used for ingredient embeddings.
    #[arg(long, env = "OPENAI_API_KEY")]
    pub openai_api_key: String,

    /// Embedding model identifier.
    #[arg(long, env = "MATCH_OPENAI_MODEL", default_value = "text-embedding-3-small")]
    pub openai_model: String,

    /// Optional embedding dimension override.
    #[arg(long, env = "MATCH_OPENAI_DIMENSIONS")]
    pub openai_dimensions: Option<usize>,

    /// Base URL for OpenAI-compatible endpoints.
    #[arg(long, env = "MATCH_OPENAI_BASE", default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,

    /// Seconds before an embedding request is abandoned.
    #[arg(long, env = "MATCH_OPENAI_TIMEOUT_SECS", default_value_t = 30)]
    pub openai_timeout_secs: u64,

    /// Seconds before a catalog lookup is abandoned.
    #[arg(long, env = "MATCH_DB_TIMEOUT_SECS", default_value_t = 10)]
    pub db_timeout_secs: u64,

    /// Max cached ingredient embeddings kept in memory (0 disables caching).
    #[arg(long, env = "MATCH_EMBEDDING_CACHE_SIZE", default_value_t = 1000)]
    pub embedding_cache_size: usize,

    /// Victim selection once the embedding cache is full.
    #[arg(long, env = "MATCH_EMBEDDING_CACHE_POLICY", value_enum, default_value_t = EvictionPolicy::Fifo)]
    pub embedding_cache_policy: EvictionPolicy,

    /// Minimum production match score, as a fraction (0.95) or percent (95%).
    #[arg(
        long,
        env = "MATCH_PRODUCTION_THRESHOLD",
        default_value = "0.95",
        value_parser = parse_threshold
    )]
    pub production_threshold: f64,

    /// Months before a cached recipe run expires.
    #[arg(long, env = "CACHE_TTL_MONTHS", default_value_t = DEFAULT_TTL_MONTHS)]
    pub cache_ttl_months: u32,

    /// Maximum ingredients accepted per request.
    #[arg(long, env = "MATCH_MAX_INGREDIENTS", default_value_t = DEFAULT_MAX_INGREDIENTS)]
    pub max_ingredients: usize,

    /// Instruction prepended to every ingredient before embedding.
    #[arg(long, env = "MATCH_DEFAULT_INSTRUCTION", default_value = DEFAULT_INSTRUCTION)]
    pub default_instruction: String,
}

impl ServerCli {
    /// Converts the parsed CLI into `MatchSettings`.
    pub fn build_settings(&self) -> MatchSettings {
        MatchSettings {
            production_threshold: self.production_threshold,
            cache_ttl: CacheTtl::months(self.cache_ttl_months),
            max_ingredients: self.max_ingredients.max(1),
            embedding_timeout: Duration::from_secs(self.openai_timeout_secs.max(1)),
            store_timeout: Duration::from_secs(self.db_timeout_secs.max(1)),
            default_instruction: self.default_instruction.clone(),
        }
    }

    /// Fully-qualified products table.
    pub fn products_table(&self) -> Result<TableName> {
        TableName::new(self.schema.clone(), self.products_table.clone())
    }

    /// Fully-qualified recipe cache table.
    pub fn recipe_cache_table(&self) -> Result<TableName> {
        TableName::new(self.schema.clone(), self.recipe_cache_table.clone())
    }
}

/// Parses `0.95` or `95%` into a score in `[0, 1]`.
pub fn parse_threshold(raw: &str) -> Result<f64, String> {
    let trimmed = raw.trim();
    let (number, scale) = match trimmed.strip_suffix('%') {
        Some(percent) => (percent.trim(), 100.0),
        None => (trimmed, 1.0),
    };
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid threshold {raw:?}"))?;
    let threshold = value / scale;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(format!("threshold {raw:?} must lie between 0 and 1 (or 0% and 100%)"));
    }
    Ok(threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_accepts_fraction_and_percent() {
        assert_eq!(parse_threshold("0.95"), Ok(0.95));
        assert_eq!(parse_threshold("95%"), Ok(0.95));
        assert_eq!(parse_threshold(" 80 % "), Ok(0.8));
    }

    #[test]
    fn threshold_rejects_out_of_range() {
        assert!(parse_threshold("1.5").is_err());
        assert!(parse_threshold("-1").is_err());
        assert!(parse_threshold("abc").is_err());
    }

    #[test]
    fn cli_defaults_build_default_settings() {
        let cli = ServerCli::try_parse_from([
            "match-api",
            "--database-url",
            "postgres://localhost/match",
            "--openai-api-key",
            "sk-test",
        ])
        .expect("parses");
        assert_eq!(cli.build_settings(), MatchSettings::default());
        assert_eq!(cli.embedding_cache_policy, EvictionPolicy::Fifo);
        assert!(cli.prepare_schema);
        assert_eq!(
            cli.products_table().expect("table").qualified(),
            "\"public\".\"products\""
        );
    }

    #[test]
    fn cli_overrides_flow_into_settings() {
        let cli = ServerCli::try_parse_from([
            "match-api",
            "--database-url",
            "postgres://localhost/match",
            "--openai-api-key",
            "sk-test",
            "--production-threshold",
            "90%",
            "--cache-ttl-months",
            "3",
            "--embedding-cache-policy",
            "lru",
            "--prepare-schema",
            "false",
        ])
        .expect("parses");
        let settings = cli.build_settings();
        assert_eq!(settings.production_threshold(), 0.9);
        assert_eq!(settings.cache_ttl(), CacheTtl::months(3));
        assert_eq!(cli.embedding_cache_policy, EvictionPolicy::Lru);
        assert!(!cli.prepare_schema);
    }
}
