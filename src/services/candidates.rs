use std::collections::HashMap;

use crate::{
    models::Prompt,
    services::{
        scoring::{bayesian_average, compute_popularity, RatingPrior},
        vector::{build_vector_weighted, FeatureWeights, IdfDict, SparseVector},
    },
};

/// A catalog item prepared for scoring
#[derive(Debug, Clone)]
pub struct CandidateItem {
    pub prompt: Prompt,
    pub vector: SparseVector,
    /// Raw engagement popularity, normalized later against the candidate batch
    pub popularity: f64,
    /// Smoothed rating on the 0..=5 scale
    pub bayesian_rating: f64,
}

impl CandidateItem {
    pub fn new(prompt: Prompt, idf: &IdfDict, weights: &FeatureWeights, prior: &RatingPrior) -> Self {
        let vector = build_vector_weighted(&prompt.features(), idf, weights);
        let popularity = compute_popularity(&prompt.engagement());
        let bayesian_rating = bayesian_average(prompt.rating_avg, prompt.rating_count, prior);

        Self {
            prompt,
            vector,
            popularity,
            bayesian_rating,
        }
    }

    pub fn id(&self) -> &str {
        &self.prompt.id
    }
}

/// Vectorizes a whole catalog, keyed by prompt id
pub fn index_catalog(
    prompts: Vec<Prompt>,
    idf: &IdfDict,
    weights: &FeatureWeights,
    prior: &RatingPrior,
) -> HashMap<String, CandidateItem> {
    prompts
        .into_iter()
        .map(|prompt| {
            let item = CandidateItem::new(prompt, idf, weights, prior);
            (item.prompt.id.clone(), item)
        })
        .collect()
}
