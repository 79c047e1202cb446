use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::EngineConfig,
    db::memory::{MemoryCache, MemoryCatalog, MemoryInteractionLog, MemoryRateLimiter},
    models::Prompt,
    services::{
        interactions::InteractionService,
        metrics::{MetricsSink, TracingMetrics},
        recommendations::{Collaborators, RecommendationService},
        search::KeywordSearcher,
        view_counts::NoViewCounts,
    },
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub recommendations: Arc<RecommendationService>,
    pub interactions: Arc<InteractionService>,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(
        recommendations: RecommendationService,
        interactions: InteractionService,
        request_timeout: Duration,
    ) -> Self {
        Self {
            recommendations: Arc::new(recommendations),
            interactions: Arc::new(interactions),
            request_timeout,
        }
    }
}

/// Process-local stores used by `STORAGE=memory` and by tests
#[derive(Clone)]
pub struct InMemoryStores {
    pub catalog: Arc<MemoryCatalog>,
    pub log: Arc<MemoryInteractionLog>,
    pub cache: Arc<MemoryCache>,
    pub limiter: Arc<MemoryRateLimiter>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl InMemoryStores {
    pub fn new(prompts: impl IntoIterator<Item = Prompt>) -> Self {
        Self {
            catalog: Arc::new(MemoryCatalog::with_prompts(prompts)),
            log: Arc::new(MemoryInteractionLog::new()),
            cache: Arc::new(MemoryCache::new()),
            limiter: Arc::new(MemoryRateLimiter::new()),
            metrics: Arc::new(TracingMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Wires both services over these stores
    pub fn app_state(
        &self,
        config: EngineConfig,
        cache_ttl_secs: u64,
        request_timeout: Duration,
    ) -> AppState {
        let recommendations = RecommendationService::new(
            Collaborators {
                catalog: self.catalog.clone(),
                interactions: self.log.clone(),
                cache: self.cache.clone(),
                searcher: Arc::new(KeywordSearcher),
                view_counts: Arc::new(NoViewCounts),
                metrics: self.metrics.clone(),
            },
            config,
            cache_ttl_secs,
        );
        let interactions = InteractionService::new(
            self.catalog.clone(),
            self.log.clone(),
            self.limiter.clone(),
            self.metrics.clone(),
        );

        AppState::new(recommendations, interactions, request_timeout)
    }
}
