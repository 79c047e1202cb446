use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::{
    config::EngineConfig,
    models::Interaction,
    services::{candidates::CandidateItem, scoring::cosine_similarity, vector::SparseVector},
};

/// Similarity given to every item when the profile carries no signal
pub const NEUTRAL_SIMILARITY: f64 = 0.5;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Interactions older than this many half-lives weigh under 0.4% and are not loaded
pub const HISTORY_HALF_LIVES: f64 = 8.0;

/// Tunables of profile building and personalized scoring
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileSettings {
    pub half_life_days: f64,
    pub min_interactions: usize,
    pub top_n: usize,
    /// Multiplier for already-seen items, in (0, 1]
    pub seen_penalty: f64,
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for ProfileSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            half_life_days: config.half_life_days,
            min_interactions: config.min_interactions,
            top_n: config.profile_top_n,
            seen_penalty: config.seen_penalty,
        }
    }
}

/// Personalization state derived from a user's interaction log.
///
/// Always rebuilt from the log; never patched in place.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    #[serde(skip)]
    pub vector: SparseVector,
    pub interaction_count: usize,
    pub top_categories: Vec<String>,
    pub top_tags: Vec<String>,
    pub top_models: Vec<String>,
    pub seen_item_ids: HashSet<String>,
    pub is_personalized: bool,
    pub last_updated: DateTime<Utc>,
}

impl UserProfile {
    /// A profile that scores every item neutrally
    pub fn empty(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            vector: SparseVector::empty(),
            interaction_count: 0,
            top_categories: Vec::new(),
            top_tags: Vec::new(),
            top_models: Vec::new(),
            seen_item_ids: HashSet::new(),
            is_personalized: false,
            last_updated: now,
        }
    }
}

/// `0.5 ^ (age / half_life)`; future timestamps count as age zero
pub fn decay_factor(created_at: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    let age_ms = (now - created_at).num_milliseconds().max(0) as f64;
    let half_life_ms = half_life_days * MS_PER_DAY;
    if !(half_life_ms > 0.0) {
        return 1.0;
    }
    0.5f64.powf(age_ms / half_life_ms)
}

/// Oldest interaction worth loading for a profile; `None` loads the whole history
pub fn history_horizon(now: DateTime<Utc>, half_life_days: f64) -> Option<DateTime<Utc>> {
    if !(half_life_days.is_finite() && half_life_days > 0.0) {
        return None;
    }
    let span_ms = half_life_days * HISTORY_HALF_LIVES * MS_PER_DAY;
    let span = chrono::Duration::try_milliseconds(span_ms as i64)?;
    now.checked_sub_signed(span)
}

fn signal_weight(interaction: &Interaction) -> f64 {
    if interaction.weight.is_finite() && interaction.weight >= 0.0 {
        interaction.weight
    } else {
        interaction.kind.weight()
    }
}

/// Highest accumulated weight first, then alphabetical
fn top_n(weights: HashMap<String, f64>, n: usize) -> Vec<String> {
    let mut ranked: Vec<(String, f64)> = weights.into_iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(n).map(|(key, _)| key).collect()
}

fn accumulate(map: &mut HashMap<String, f64>, key: Option<&str>, weight: f64) {
    if let Some(key) = key.map(str::trim).filter(|k| !k.is_empty()) {
        *map.entry(key.to_lowercase()).or_insert(0.0) += weight;
    }
}

/// Aggregates a user's decayed, type-weighted interactions into a profile.
///
/// Interactions of other actors are ignored. Items missing from `items` still
/// count as seen but contribute no content signal.
pub fn build_profile(
    user_id: &str,
    interactions: &[Interaction],
    items: &HashMap<String, CandidateItem>,
    settings: &ProfileSettings,
    now: DateTime<Utc>,
) -> UserProfile {
    let mut raw: HashMap<String, f64> = HashMap::new();
    let mut categories = HashMap::new();
    let mut tags = HashMap::new();
    let mut models = HashMap::new();
    let mut seen_item_ids = HashSet::new();
    let mut interaction_count = 0usize;

    for interaction in interactions.iter().filter(|i| i.actor_id == user_id) {
        interaction_count += 1;
        seen_item_ids.insert(interaction.item_id.clone());

        let Some(item) = items.get(&interaction.item_id) else {
            continue;
        };

        let weight = decay_factor(interaction.created_at, now, settings.half_life_days)
            * signal_weight(interaction);
        if weight <= 0.0 {
            continue;
        }

        for (key, value) in item.vector.iter() {
            *raw.entry(key.to_string()).or_insert(0.0) += weight * value;
        }

        accumulate(&mut categories, item.prompt.category.as_deref(), weight);
        accumulate(&mut models, item.prompt.model.as_deref(), weight);
        for tag in &item.prompt.tags {
            accumulate(&mut tags, Some(tag), weight);
        }
    }

    let vector = SparseVector::normalized(raw);
    let is_personalized = interaction_count > 0
        && interaction_count >= settings.min_interactions
        && !vector.is_empty();

    tracing::debug!(
        user_id = %user_id,
        interaction_count,
        dimensions = vector.len(),
        is_personalized,
        "Built user profile"
    );

    UserProfile {
        user_id: user_id.to_string(),
        vector,
        interaction_count,
        top_categories: top_n(categories, settings.top_n),
        top_tags: top_n(tags, settings.top_n),
        top_models: top_n(models, settings.top_n),
        seen_item_ids,
        is_personalized,
        last_updated: now,
    }
}

/// Personal relevance of one item to a profile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PersonalizedScore {
    pub similarity: f64,
    pub seen_penalty: f64,
    /// `similarity * seen_penalty`
    pub final_score: f64,
}

pub fn compute_personalized_score(
    item_vector: &SparseVector,
    profile: &UserProfile,
    item_id: &str,
    settings: &ProfileSettings,
) -> PersonalizedScore {
    if !profile.is_personalized {
        return PersonalizedScore {
            similarity: NEUTRAL_SIMILARITY,
            seen_penalty: 1.0,
            final_score: NEUTRAL_SIMILARITY,
        };
    }

    let similarity = cosine_similarity(item_vector, &profile.vector);
    let seen_penalty = if profile.seen_item_ids.contains(item_id) {
        settings.seen_penalty
    } else {
        1.0
    };

    PersonalizedScore {
        similarity,
        seen_penalty,
        final_score: similarity * seen_penalty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InteractionType, Prompt};
    use crate::services::{
        candidates::index_catalog,
        scoring::RatingPrior,
        vector::{build_vector, FeatureWeights, IdfDict},
    };
    use crate::models::ContentFeatures;
    use chrono::Duration;

    fn prompt(id: &str, tags: &[&str], category: &str, model: &str) -> Prompt {
        let mut prompt = Prompt::new(id, id);
        prompt.tags = tags.iter().map(|t| t.to_string()).collect();
        prompt.category = Some(category.to_string());
        prompt.model = Some(model.to_string());
        prompt
    }

    fn catalog() -> HashMap<String, CandidateItem> {
        index_catalog(
            vec![
                prompt("rust-cli", &["rust", "cli"], "dev", "gpt-4"),
                prompt("rust-web", &["rust", "web"], "dev", "claude"),
                prompt("poem", &["poetry"], "writing", "gpt-4"),
            ],
            &IdfDict::default(),
            &FeatureWeights::default(),
            &RatingPrior::default(),
        )
    }

    fn interaction(item: &str, kind: InteractionType, age: Duration, now: DateTime<Utc>) -> Interaction {
        Interaction::new("u1", item, kind, now - age)
    }

    #[test]
    fn test_decay_factor_half_life() {
        let now = Utc::now();
        assert!((decay_factor(now, now, 14.0) - 1.0).abs() < 1e-12);
        assert!((decay_factor(now - Duration::days(14), now, 14.0) - 0.5).abs() < 1e-9);
        assert!((decay_factor(now - Duration::days(28), now, 14.0) - 0.25).abs() < 1e-9);
        assert_eq!(decay_factor(now + Duration::days(3), now, 14.0), 1.0);
    }

    #[test]
    fn test_history_horizon() {
        let now = Utc::now();
        assert_eq!(history_horizon(now, 14.0), Some(now - Duration::days(112)));
        assert!(decay_factor(now - Duration::days(112), now, 14.0) < 0.004);
        assert_eq!(history_horizon(now, 0.0), None);
        assert_eq!(history_horizon(now, f64::INFINITY), None);
        assert_eq!(history_horizon(now, 1e300), None);
    }

    #[test]
    fn test_empty_history_is_not_personalized() {
        let now = Utc::now();
        let profile = build_profile("u1", &[], &catalog(), &ProfileSettings::default(), now);
        assert!(!profile.is_personalized);
        assert_eq!(profile.interaction_count, 0);
        assert!(profile.vector.is_empty());
        assert!(profile.seen_item_ids.is_empty());
    }

    #[test]
    fn test_profile_ignores_other_actors() {
        let now = Utc::now();
        let mut other = interaction("poem", InteractionType::Copy, Duration::zero(), now);
        other.actor_id = "u2".to_string();
        let profile = build_profile("u1", &[other], &catalog(), &ProfileSettings::default(), now);
        assert_eq!(profile.interaction_count, 0);
        assert!(!profile.is_personalized);
    }

    #[test]
    fn test_profile_vector_is_unit_norm_and_tracks_seen() {
        let now = Utc::now();
        let history = vec![
            interaction("rust-cli", InteractionType::Copy, Duration::hours(1), now),
            interaction("poem", InteractionType::View, Duration::days(2), now),
        ];
        let profile = build_profile("u1", &history, &catalog(), &ProfileSettings::default(), now);

        assert!(profile.is_personalized);
        assert_eq!(profile.interaction_count, 2);
        assert!((profile.vector.norm() - 1.0).abs() < 1e-9);
        assert!(profile.seen_item_ids.contains("rust-cli"));
        assert!(profile.seen_item_ids.contains("poem"));
        assert_eq!(profile.top_categories.first().map(String::as_str), Some("dev"));
        assert_eq!(profile.top_models.first().map(String::as_str), Some("gpt-4"));
    }

    #[test]
    fn test_stronger_signal_dominates_profile() {
        let now = Utc::now();
        let history = vec![
            interaction("rust-cli", InteractionType::View, Duration::zero(), now),
            interaction("poem", InteractionType::Copy, Duration::zero(), now),
        ];
        let profile = build_profile("u1", &history, &catalog(), &ProfileSettings::default(), now);
        assert_eq!(profile.top_categories, vec!["writing".to_string(), "dev".to_string()]);
        assert_eq!(profile.top_tags.first().map(String::as_str), Some("poetry"));
    }

    #[test]
    fn test_recent_interaction_outweighs_old_one() {
        let now = Utc::now();
        let history = vec![
            interaction("rust-cli", InteractionType::Like, Duration::days(90), now),
            interaction("poem", InteractionType::Like, Duration::hours(1), now),
        ];
        let profile = build_profile("u1", &history, &catalog(), &ProfileSettings::default(), now);
        assert_eq!(profile.top_categories.first().map(String::as_str), Some("writing"));
    }

    #[test]
    fn test_top_n_limits_summary_length() {
        let now = Utc::now();
        let settings = ProfileSettings {
            top_n: 1,
            ..ProfileSettings::default()
        };
        let history = vec![
            interaction("rust-cli", InteractionType::Like, Duration::zero(), now),
            interaction("rust-web", InteractionType::Like, Duration::zero(), now),
        ];
        let profile = build_profile("u1", &history, &catalog(), &settings, now);
        assert_eq!(profile.top_tags, vec!["rust".to_string()]);
        assert_eq!(profile.top_models.len(), 1);
    }

    #[test]
    fn test_unknown_items_count_but_do_not_personalize() {
        let now = Utc::now();
        let history = vec![interaction("deleted", InteractionType::Copy, Duration::zero(), now)];
        let profile = build_profile("u1", &history, &catalog(), &ProfileSettings::default(), now);
        assert_eq!(profile.interaction_count, 1);
        assert!(profile.seen_item_ids.contains("deleted"));
        assert!(!profile.is_personalized);
    }

    #[test]
    fn test_min_interactions_threshold() {
        let now = Utc::now();
        let settings = ProfileSettings {
            min_interactions: 3,
            ..ProfileSettings::default()
        };
        let history = vec![
            interaction("rust-cli", InteractionType::Copy, Duration::zero(), now),
            interaction("rust-web", InteractionType::Copy, Duration::zero(), now),
        ];
        let profile = build_profile("u1", &history, &catalog(), &settings, now);
        assert!(!profile.is_personalized);
    }

    #[test]
    fn test_non_personalized_score_is_neutral() {
        let profile = UserProfile::empty("u1", Utc::now());
        let settings = ProfileSettings::default();
        for vector in [
            SparseVector::empty(),
            build_vector(&ContentFeatures {
                tags: vec!["ai".to_string()],
                ..ContentFeatures::default()
            }),
        ] {
            let score = compute_personalized_score(&vector, &profile, "any", &settings);
            assert_eq!(score.similarity, 0.5);
            assert_eq!(score.seen_penalty, 1.0);
            assert_eq!(score.final_score, 0.5);
        }
    }

    #[test]
    fn test_seen_item_scores_lower_than_unseen() {
        let now = Utc::now();
        let items = catalog();
        let settings = ProfileSettings::default();
        let history = vec![interaction("rust-cli", InteractionType::Copy, Duration::zero(), now)];
        let profile = build_profile("u1", &history, &items, &settings, now);

        let vector = &items["rust-cli"].vector;
        let seen = compute_personalized_score(vector, &profile, "rust-cli", &settings);
        let unseen = compute_personalized_score(vector, &profile, "rust-cli-copy", &settings);

        assert!(seen.final_score < unseen.final_score);
        assert_eq!(seen.seen_penalty, settings.seen_penalty);
        assert!((seen.final_score - seen.similarity * seen.seen_penalty).abs() < 1e-12);
        assert_eq!(unseen.final_score, unseen.similarity);
    }

    #[test]
    fn test_similar_item_scores_higher_than_unrelated() {
        let now = Utc::now();
        let items = catalog();
        let settings = ProfileSettings::default();
        let history = vec![interaction("rust-cli", InteractionType::Copy, Duration::zero(), now)];
        let profile = build_profile("u1", &history, &items, &settings, now);

        let related = compute_personalized_score(&items["rust-web"].vector, &profile, "rust-web", &settings);
        let unrelated = compute_personalized_score(&items["poem"].vector, &profile, "poem", &settings);
        assert!(related.final_score > unrelated.final_score);
    }
}
