use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use docsearch::storage::elastic::ElasticClient;
use docsearch::storage::redis_store::RedisStore;
use docsearch::{router, AppState, Config, SecureUriCodec, TagCache};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();

    let elastic = Arc::new(
        ElasticClient::new(&config.elasticsearch_url, &config.es_index, config.request_timeout())
            .context("Failed to build Elasticsearch client")?,
    );
    let redis = Arc::new(
        RedisStore::connect(&config.redis_url)
            .await
            .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))?,
    );

    let tags = TagCache::new(redis, elastic.clone(), elastic.clone()).with_ttl(config.tag_cache_ttl());
    let state = Arc::new(AppState {
        search: elastic.clone(),
        visibility: elastic,
        tags,
        codec: SecureUriCodec::new(&config.uri_secret),
        max_tags: config.max_tags_in_agg,
    });

    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    tracing::info!(
        "Document search service listening on {} (index {} at {})",
        config.bind_addr,
        config.es_index,
        config.elasticsearch_url
    );

    axum::serve(listener, app).await.context("Server stopped unexpectedly")?;
    Ok(())
}
