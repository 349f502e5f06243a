use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ingredient_match::api;
use ingredient_match::embedder::openai::OpenAiEmbedder;
use ingredient_match::{
    EmbeddingCache, EmbeddingProvider, MatchEngine, PgRecipeCache, PgVectorStore, ServerCli,
    TokenEstimator,
};
use tokio_postgres::NoTls;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = ServerCli::parse();
    let settings = cli.build_settings();
    let tokens = Arc::new(TokenEstimator::new(settings.default_instruction())?);
    let products_table = cli.products_table()?;
    let recipe_cache_table = cli.recipe_cache_table()?;

    let embedder = Arc::new(OpenAiEmbedder::new(
        cli.openai_api_key.clone(),
        cli.openai_base_url.clone(),
        cli.openai_model.clone(),
        cli.openai_dimensions,
        Duration::from_secs(cli.openai_timeout_secs.max(1)),
    )?);
    let dimensions = embedder.dimensions();

    let (client, connection) = tokio_postgres::connect(&cli.database_url, NoTls)
        .await
        .context("failed to connect to Postgres")?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(error = %err, "postgres connection error");
        }
    });
    let client = Arc::new(client);

    let store = PgVectorStore::new(Arc::clone(&client), products_table, dimensions);
    let recipe_cache = PgRecipeCache::new(Arc::clone(&client), recipe_cache_table);
    if cli.prepare_schema {
        store.prepare_schema().await?;
        recipe_cache.prepare_schema().await?;
        info!(table = %store.table().qualified(), "schema prepared");
    }

    let embedding_cache = Arc::new(EmbeddingCache::new(
        cli.embedding_cache_size,
        cli.embedding_cache_policy,
    ));
    let engine = Arc::new(MatchEngine::new(
        embedder,
        embedding_cache,
        Arc::new(store),
        Arc::new(recipe_cache),
        settings,
    ));
    let app = api::router(engine, tokens);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        %addr,
        model = %cli.openai_model,
        dimensions,
        cache_size = cli.embedding_cache_size,
        cache_policy = ?cli.embedding_cache_policy,
        "match api listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown")?;
    info!("match api stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
}
