use chrono::Utc;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::{
    config::EngineConfig,
    db::{CacheKey, InteractionLog, PromptCatalog, ResponseCache},
    error::{AppError, AppResult},
    models::{Prompt, Recommendation, RecommendationQuery, RecommendedPrompt, Viewer},
    services::{
        candidates::{index_catalog, CandidateItem},
        diversity::{apply_diversity_penalty, ScoredCandidate},
        metrics::MetricsSink,
        profile::{
            build_profile, compute_personalized_score, history_horizon, ProfileSettings,
            UserProfile,
        },
        scoring::{
            batch_max, final_ranking_score, normalize_against, RankingSignals, RankingWeights,
            RatingPrior,
        },
        search::{normalize_query, PromptSearcher},
        vector::{compute_idf, FeatureWeights, IdfDict},
        view_counts::ViewCountProvider,
    },
};

/// Collaborators the orchestrator reads from and writes to
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn PromptCatalog>,
    pub interactions: Arc<dyn InteractionLog>,
    pub cache: Arc<dyn ResponseCache>,
    pub searcher: Arc<dyn PromptSearcher>,
    pub view_counts: Arc<dyn ViewCountProvider>,
    pub metrics: Arc<dyn MetricsSink>,
}

struct IdfSnapshot {
    fingerprint: u64,
    dict: Arc<IdfDict>,
}

/// Identifies a catalog state by its ids and update times
fn catalog_fingerprint(prompts: &[Prompt]) -> u64 {
    let mut hasher = DefaultHasher::new();
    prompts.len().hash(&mut hasher);
    for prompt in prompts {
        prompt.id.hash(&mut hasher);
        prompt.updated_at.timestamp_micros().hash(&mut hasher);
    }
    hasher.finish()
}

/// A computed list and whether any collaborator failed while computing it
struct Computed {
    recommendations: Vec<Recommendation>,
    degraded: bool,
}

/// Turns the catalog and a viewer's history into a ranked, cached list
pub struct RecommendationService {
    collaborators: Collaborators,
    config: EngineConfig,
    cache_ttl_secs: u64,
    idf: RwLock<Option<IdfSnapshot>>,
}

impl RecommendationService {
    pub fn new(collaborators: Collaborators, config: EngineConfig, cache_ttl_secs: u64) -> Self {
        Self {
            collaborators,
            config,
            cache_ttl_secs,
            idf: RwLock::new(None),
        }
    }

    /// Only the target user may request recommendations "for" themselves
    pub fn authorize(viewer: &Viewer, query: &RecommendationQuery) -> AppResult<()> {
        match query.for_user.as_deref() {
            None => Ok(()),
            Some(target) if viewer.user_id.as_deref() == Some(target) => Ok(()),
            Some(_) => Err(AppError::Forbidden(
                "recommendations can only be requested for yourself".to_string(),
            )),
        }
    }

    /// Returns the ranked list for a viewer.
    ///
    /// Only authorization failures are errors. Collaborator failures degrade to
    /// a non-personalized list that is not cached.
    pub async fn get_recommendations(
        &self,
        viewer: &Viewer,
        query: &RecommendationQuery,
    ) -> AppResult<Vec<Recommendation>> {
        Self::authorize(viewer, query)?;

        let started = Instant::now();
        let metrics = &self.collaborators.metrics;
        metrics.increment("recommendations.requests", 1);

        let limit = self.config.clamp_limit(query.limit);
        let normalized_query = normalize_query(query.q.as_deref());
        let key = CacheKey::Recommendations {
            viewer: viewer.user_id.clone(),
            query: normalized_query.clone(),
            limit,
        };

        let mut cache_available = true;
        match self.collaborators.cache.get(&key).await {
            Ok(Some(json)) => match serde_json::from_str::<Vec<Recommendation>>(&json) {
                Ok(cached) => {
                    tracing::debug!(cache_key = %key, count = cached.len(), "Recommendation cache hit");
                    metrics.increment("recommendations.cache_hit", 1);
                    return Ok(cached);
                }
                Err(e) => {
                    tracing::warn!(error = %e, cache_key = %key, "Discarding undecodable cache entry");
                }
            },
            Ok(None) => {
                tracing::debug!(cache_key = %key, "Recommendation cache miss");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Recommendation cache unavailable");
                cache_available = false;
            }
        }

        let computed = self
            .compute(viewer, normalized_query.as_deref(), limit)
            .await;

        if computed.degraded || !cache_available {
            metrics.increment("recommendations.degraded", 1);
        } else {
            self.store(&key, &computed.recommendations).await;
        }

        metrics.histogram(
            "recommendations.latency_ms",
            started.elapsed().as_secs_f64() * 1000.0,
        );
        tracing::info!(
            viewer = viewer.user_id.as_deref().unwrap_or("anonymous"),
            query = normalized_query.as_deref().unwrap_or(""),
            limit,
            returned = computed.recommendations.len(),
            degraded = computed.degraded,
            "Recommendations computed"
        );

        Ok(computed.recommendations)
    }

    async fn store(&self, key: &CacheKey, recommendations: &[Recommendation]) {
        let json = match serde_json::to_string(recommendations) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Recommendation serialization error");
                return;
            }
        };

        if let Err(e) = self
            .collaborators
            .cache
            .set(key, json, self.cache_ttl_secs)
            .await
        {
            tracing::warn!(error = %e, cache_key = %key, "Failed to cache recommendations");
        }
    }

    /// Returns the IDF dictionary for this catalog state, rebuilding it when the catalog changed
    async fn idf_for(&self, prompts: &[Prompt]) -> Arc<IdfDict> {
        let fingerprint = catalog_fingerprint(prompts);

        if let Some(snapshot) = self.idf.read().await.as_ref() {
            if snapshot.fingerprint == fingerprint {
                return snapshot.dict.clone();
            }
        }

        let features: Vec<_> = prompts.iter().map(Prompt::features).collect();
        let dict = Arc::new(compute_idf(&features));
        tracing::debug!(documents = dict.documents(), tags = dict.len(), "Rebuilt IDF dictionary");

        *self.idf.write().await = Some(IdfSnapshot {
            fingerprint,
            dict: dict.clone(),
        });
        dict
    }

    async fn load_profile(
        &self,
        viewer: &Viewer,
        items: &HashMap<String, CandidateItem>,
        settings: &ProfileSettings,
    ) -> (UserProfile, bool) {
        let now = Utc::now();
        let Some(user_id) = viewer.user_id.as_deref() else {
            return (UserProfile::empty("anonymous", now), false);
        };

        let since = history_horizon(now, settings.half_life_days);
        match self.collaborators.interactions.for_actor(user_id, since).await {
            Ok(history) => (build_profile(user_id, &history, items, settings, now), false),
            Err(e) => {
                tracing::warn!(error = %e, user_id = %user_id, "Interaction log unavailable, serving non-personalized");
                (UserProfile::empty(user_id, now), true)
            }
        }
    }

    async fn compute(&self, viewer: &Viewer, query: Option<&str>, limit: usize) -> Computed {
        let metrics = &self.collaborators.metrics;

        let prompts = match self.collaborators.catalog.list_prompts().await {
            Ok(prompts) => prompts,
            Err(e) => {
                tracing::warn!(error = %e, "Prompt catalog unavailable");
                return Computed {
                    recommendations: Vec::new(),
                    degraded: true,
                };
            }
        };

        let idf = self.idf_for(&prompts).await;
        let items = index_catalog(
            prompts,
            &idf,
            &FeatureWeights::from(&self.config),
            &RatingPrior::from(&self.config),
        );

        let mut candidate_ids: Vec<String> = match query {
            Some(q) => {
                let all: Vec<Prompt> = items.values().map(|item| item.prompt.clone()).collect();
                self.collaborators
                    .searcher
                    .filter(q, all)
                    .into_iter()
                    .map(|prompt| prompt.id)
                    .collect()
            }
            None => items.keys().cloned().collect(),
        };
        candidate_ids.sort();
        candidate_ids.dedup();
        metrics.gauge("recommendations.candidates", candidate_ids.len() as f64);

        let profile_settings = ProfileSettings::from(&self.config);
        let (profile, mut degraded) = self.load_profile(viewer, &items, &profile_settings).await;

        let candidates: Vec<&CandidateItem> = candidate_ids
            .iter()
            .filter_map(|id| items.get(id))
            .collect();
        let popularity: Vec<f64> = candidates.iter().map(|item| item.popularity).collect();
        let max_popularity = batch_max(&popularity);
        let weights = RankingWeights::from(&self.config);

        let scored: Vec<ScoredCandidate<'_, &CandidateItem>> = candidates
            .iter()
            .map(|item| {
                let personal =
                    compute_personalized_score(&item.vector, &profile, item.id(), &profile_settings);
                let signals = RankingSignals {
                    cosine: personal.final_score,
                    popularity_norm: normalize_against(max_popularity, item.popularity),
                    bayesian_rating: item.bayesian_rating,
                };
                ScoredCandidate {
                    id: item.id().to_string(),
                    base_score: final_ranking_score(&signals, &weights),
                    vector: &item.vector,
                    payload: *item,
                }
            })
            .collect();

        let ranked = apply_diversity_penalty(scored, limit, self.config.diversity_strength);

        let ids: Vec<String> = ranked.iter().map(|r| r.id.clone()).collect();
        let views = match self.collaborators.view_counts.view_counts(&ids).await {
            Ok(views) => views,
            Err(e) => {
                tracing::warn!(error = %e, "View counts unavailable");
                degraded = true;
                HashMap::new()
            }
        };

        let mut recommendations: Vec<Recommendation> = ranked
            .into_iter()
            .map(|r| Recommendation {
                score: r.final_score,
                base_score: r.base_score,
                diversity_penalty: r.diversity_penalty,
                item: RecommendedPrompt {
                    prompt: r.payload.prompt.clone(),
                    view_count: views.get(&r.id).copied(),
                },
                id: r.id,
            })
            .collect();

        recommendations.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));

        Computed {
            recommendations,
            degraded,
        }
    }
}
