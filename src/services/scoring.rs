//! Similarity and quality scoring.
//!
//! Every function here has a neutral fallback for degenerate input and never
//! returns NaN or infinity.

use crate::{config::EngineConfig, models::EngagementCounts, services::vector::SparseVector};

/// Highest valid rating
pub const MAX_RATING: f64 = 5.0;

const LIKE_WEIGHT: f64 = 1.0;
const SAVE_WEIGHT: f64 = 1.2;
const COMMENT_WEIGHT: f64 = 1.5;
const RATING_COUNT_WEIGHT: f64 = 0.5;

/// Cosine similarity of two unit-norm vectors, clamped to `[0, 1]`
pub fn cosine_similarity(a: &SparseVector, b: &SparseVector) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };

    let dot: f64 = small
        .iter()
        .filter_map(|(key, w)| large.get(key).map(|other| w * other))
        .sum();

    if dot.is_finite() {
        dot.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Prior used to smooth average ratings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingPrior {
    pub global_avg: f64,
    pub strength: f64,
}

impl Default for RatingPrior {
    fn default() -> Self {
        Self {
            global_avg: 3.5,
            strength: 5.0,
        }
    }
}

impl From<&EngineConfig> for RatingPrior {
    fn from(config: &EngineConfig) -> Self {
        Self {
            global_avg: config.bayes_global_avg,
            strength: config.bayes_prior_strength,
        }
    }
}

fn clamp_rating(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, MAX_RATING)
    } else {
        0.0
    }
}

/// Pulls a low-sample average toward the prior. Zero ratings yield the prior average.
pub fn bayesian_average(rating_avg: f64, rating_count: u64, prior: &RatingPrior) -> f64 {
    let global_avg = clamp_rating(prior.global_avg);
    if rating_count == 0 {
        return global_avg;
    }

    let count = rating_count as f64;
    let strength = if prior.strength.is_finite() {
        prior.strength.max(0.0)
    } else {
        0.0
    };
    let total = count + strength;

    (count / total) * clamp_rating(rating_avg) + (strength / total) * global_avg
}

/// Weighted engagement sum, not normalized
pub fn compute_popularity(counts: &EngagementCounts) -> f64 {
    counts.likes as f64 * LIKE_WEIGHT
        + counts.saves as f64 * SAVE_WEIGHT
        + counts.comments as f64 * COMMENT_WEIGHT
        + counts.rating_count as f64 * RATING_COUNT_WEIGHT
}

/// Highest popularity in a candidate batch, used as the normalization divisor
pub fn batch_max(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0, f64::max)
}

/// Scales a popularity value into `[0, 1]` against the batch maximum
pub fn normalize_popularity(all_values: &[f64], value: f64) -> f64 {
    normalize_against(batch_max(all_values), value)
}

/// Same as [`normalize_popularity`] with a precomputed maximum
pub fn normalize_against(max: f64, value: f64) -> f64 {
    if max <= 0.0 || !value.is_finite() {
        return 0.0;
    }
    (value / max).clamp(0.0, 1.0)
}

/// Blend weights of the final ranking score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingWeights {
    pub similarity: f64,
    pub popularity: f64,
    pub rating: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            similarity: 0.65,
            popularity: 0.20,
            rating: 0.15,
        }
    }
}

impl From<&EngineConfig> for RankingWeights {
    fn from(config: &EngineConfig) -> Self {
        Self {
            similarity: config.rank_weight_similarity,
            popularity: config.rank_weight_popularity,
            rating: config.rank_weight_rating,
        }
    }
}

/// Inputs of the final ranking blend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingSignals {
    pub cosine: f64,
    pub popularity_norm: f64,
    /// Bayesian rating on the 0..=5 scale
    pub bayesian_rating: f64,
}

pub fn final_ranking_score(signals: &RankingSignals, weights: &RankingWeights) -> f64 {
    let finite = |v: f64| if v.is_finite() { v } else { 0.0 };

    let score = weights.similarity * finite(signals.cosine)
        + weights.popularity * finite(signals.popularity_norm)
        + weights.rating * (clamp_rating(signals.bayesian_rating) / MAX_RATING);

    finite(score)
}
