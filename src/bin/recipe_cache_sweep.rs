use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ingredient_match::{PgRecipeCache, RecipeCacheStore, TableName};
use tokio_postgres::NoTls;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "recipe-cache-sweep",
    about = "Deletes expired recipe cache entries and reports cache statistics"
)]
struct SweepCli {
    /// Postgres connection string (postgres://...).
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Schema holding the recipe cache table.
    #[arg(long, env = "MATCH_SCHEMA", default_value = "public")]
    schema: String,

    /// Table storing cached recipe runs.
    #[arg(long, env = "MATCH_RECIPE_CACHE_TABLE", default_value = "recipe_cache")]
    table: String,

    /// Only print statistics; do not delete anything.
    #[arg(long, default_value_t = false)]
    stats_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = SweepCli::parse();
    let table = TableName::new(cli.schema, cli.table)?;
    let (client, connection) = tokio_postgres::connect(&cli.database_url, NoTls)
        .await
        .context("failed to connect to Postgres")?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(error = %err, "postgres connection error");
        }
    });
    let cache = PgRecipeCache::new(Arc::new(client), table.clone());

    if !cli.stats_only {
        let removed = cache.purge_expired().await?;
        info!(table = %table.qualified(), removed, "purged expired recipe cache entries");
    }

    let stats = cache.stats().await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&stats).context("failed to encode cache stats")?
    );
    Ok(())
}
