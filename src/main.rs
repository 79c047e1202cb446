use anyhow::Context;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use promptrec_api::{
    api::{create_router, AppState},
    config::{Config, EngineConfig, StorageBackend},
    db::{
        create_pool, create_redis_client,
        memory::{MemoryCache, MemoryCatalog, MemoryInteractionLog, MemoryRateLimiter},
        redis::CacheWriterHandle,
        InteractionLog, PgStore, PromptCatalog, RateLimitStore, RedisCache, RedisRateLimiter,
        ResponseCache,
    },
    services::{
        interactions::InteractionService,
        metrics::{MetricsSink, TracingMetrics},
        recommendations::{Collaborators, RecommendationService},
        search::KeywordSearcher,
        view_counts::{HttpViewCounts, NoViewCounts, ViewCountProvider},
    },
};

struct Stores {
    catalog: Arc<dyn PromptCatalog>,
    log: Arc<dyn InteractionLog>,
    cache: Arc<dyn ResponseCache>,
    limiter: Arc<dyn RateLimitStore>,
    cache_writer: Option<CacheWriterHandle>,
}

async fn connect_stores(config: &Config) -> anyhow::Result<Stores> {
    match config.storage {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; all state is lost on restart");
            Ok(Stores {
                catalog: Arc::new(MemoryCatalog::new()),
                log: Arc::new(MemoryInteractionLog::new()),
                cache: Arc::new(MemoryCache::new()),
                limiter: Arc::new(MemoryRateLimiter::new()),
                cache_writer: None,
            })
        }
        StorageBackend::Postgres => {
            let pool = create_pool(&config.database_url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            let redis_client = create_redis_client(&config.redis_url)?;
            let (cache, cache_writer) = RedisCache::new(redis_client.clone());
            let store = Arc::new(PgStore::new(pool));

            Ok(Stores {
                catalog: store.clone(),
                log: store,
                cache: Arc::new(cache),
                limiter: Arc::new(RedisRateLimiter::new(redis_client)),
                cache_writer: Some(cache_writer),
            })
        }
    }
}

fn view_count_provider(config: &Config) -> anyhow::Result<Arc<dyn ViewCountProvider>> {
    Ok(match config.view_count_api_url.as_deref() {
        Some(url) => Arc::new(HttpViewCounts::new(
            url,
            Duration::from_millis(config.view_count_timeout_ms),
        )?),
        None => {
            tracing::info!("VIEW_COUNT_API_URL not set; view counts disabled");
            Arc::new(NoViewCounts)
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("promptrec_api=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let engine_config = EngineConfig::from_env()?;

    let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetrics);
    let view_counts = view_count_provider(&config)?;
    let stores = connect_stores(&config).await?;

    let recommendations = RecommendationService::new(
        Collaborators {
            catalog: stores.catalog.clone(),
            interactions: stores.log.clone(),
            cache: stores.cache,
            searcher: Arc::new(KeywordSearcher),
            view_counts,
            metrics: metrics.clone(),
        },
        engine_config,
        config.recommendation_cache_ttl_secs,
    );
    let interactions =
        InteractionService::new(stores.catalog, stores.log, stores.limiter, metrics);

    let state = AppState::new(
        recommendations,
        interactions,
        Duration::from_millis(config.request_timeout_ms),
    );
    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(addr = %addr, storage = ?config.storage, "Server running");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(cache_writer) = stores.cache_writer {
        cache_writer.shutdown().await;
    }

    Ok(())
}
