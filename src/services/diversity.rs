//! Greedy redundancy-aware re-ranking.
//!
//! Each pick multiplies the remaining candidates' scores by a penalty derived
//! from their highest content similarity to anything already picked:
//! `penalty = 1 - strength * max_similarity`. The curve is monotone, so a
//! near-duplicate of a pick always loses more than an unrelated item, and the
//! first pick is never penalized.

use std::cmp::Ordering;

use crate::services::{scoring::cosine_similarity, vector::SparseVector};

/// A candidate entering re-ranking
#[derive(Debug, Clone)]
pub struct ScoredCandidate<'a, T> {
    pub id: String,
    pub base_score: f64,
    pub vector: &'a SparseVector,
    pub payload: T,
}

/// A candidate after re-ranking
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate<T> {
    pub id: String,
    pub base_score: f64,
    /// In (0, 1]
    pub diversity_penalty: f64,
    /// `base_score * diversity_penalty`
    pub final_score: f64,
    pub payload: T,
}

/// Penalty for a candidate whose closest already-picked item has `max_similarity`
pub fn penalty_for(max_similarity: f64, strength: f64) -> f64 {
    let strength = if strength.is_finite() {
        strength.clamp(0.0, 0.99)
    } else {
        0.0
    };
    let similarity = if max_similarity.is_finite() {
        max_similarity.clamp(0.0, 1.0)
    } else {
        0.0
    };
    1.0 - strength * similarity
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Higher score first, then higher base score, then id ascending
fn rank_order(a_score: f64, a_base: f64, a_id: &str, b_score: f64, b_base: f64, b_id: &str) -> Ordering {
    b_score
        .total_cmp(&a_score)
        .then_with(|| b_base.total_cmp(&a_base))
        .then_with(|| a_id.cmp(b_id))
}

struct PoolEntry<'a, T> {
    candidate: ScoredCandidate<'a, T>,
    max_similarity: f64,
}

impl<T> PoolEntry<'_, T> {
    fn penalized_score(&self, strength: f64) -> f64 {
        self.candidate.base_score * penalty_for(self.max_similarity, strength)
    }
}

/// Selects up to `top_k` candidates, suppressing near-duplicates of earlier picks.
///
/// The output is ordered by pick, which is also non-increasing `final_score`.
pub fn apply_diversity_penalty<T>(
    candidates: Vec<ScoredCandidate<'_, T>>,
    top_k: usize,
    strength: f64,
) -> Vec<RankedCandidate<T>> {
    let mut pool: Vec<PoolEntry<'_, T>> = candidates
        .into_iter()
        .map(|mut candidate| {
            candidate.base_score = finite_or_zero(candidate.base_score);
            PoolEntry {
                candidate,
                max_similarity: 0.0,
            }
        })
        .collect();

    pool.sort_by(|a, b| {
        rank_order(
            a.candidate.base_score,
            a.candidate.base_score,
            &a.candidate.id,
            b.candidate.base_score,
            b.candidate.base_score,
            &b.candidate.id,
        )
    });

    let mut ranked = Vec::with_capacity(top_k.min(pool.len()));

    while ranked.len() < top_k && !pool.is_empty() {
        // The pool is re-sorted by penalized score after every pick, so the head is the best
        let entry = pool.remove(0);
        let diversity_penalty = if ranked.is_empty() {
            1.0
        } else {
            penalty_for(entry.max_similarity, strength)
        };

        for other in pool.iter_mut() {
            let similarity = cosine_similarity(entry.candidate.vector, other.candidate.vector);
            if similarity > other.max_similarity {
                other.max_similarity = similarity;
            }
        }
        pool.sort_by(|a, b| {
            rank_order(
                a.penalized_score(strength),
                a.candidate.base_score,
                &a.candidate.id,
                b.penalized_score(strength),
                b.candidate.base_score,
                &b.candidate.id,
            )
        });

        let ScoredCandidate {
            id,
            base_score,
            payload,
            ..
        } = entry.candidate;

        ranked.push(RankedCandidate {
            id,
            base_score,
            diversity_penalty,
            final_score: base_score * diversity_penalty,
            payload,
        });
    }

    ranked
}
