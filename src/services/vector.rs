//! Sparse feature vectors built from a prompt's categorical attributes.
//!
//! Keys are namespaced (`tag:`, `cat:`, `model:`, `lang:`) and lower-cased.
//! Every non-empty vector leaving this module has unit L2 norm.

use std::collections::HashMap;

use crate::{config::EngineConfig, models::ContentFeatures};

/// Mapping from feature key to a non-negative weight
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector {
    weights: HashMap<String, f64>,
}

impl SparseVector {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a unit-norm vector from raw weights.
    ///
    /// Non-finite and non-positive weights are dropped. If nothing is left the
    /// vector is empty.
    pub fn normalized(raw: HashMap<String, f64>) -> Self {
        let weights: HashMap<String, f64> = raw
            .into_iter()
            .filter(|(_, w)| w.is_finite() && *w > 0.0)
            .collect();

        let norm = weights.values().map(|w| w * w).sum::<f64>().sqrt();
        if !norm.is_finite() || norm <= 0.0 {
            return Self::empty();
        }

        Self {
            weights: weights.into_iter().map(|(k, w)| (k, w / norm)).collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.weights.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.weights.iter().map(|(k, w)| (k.as_str(), *w))
    }

    pub fn norm(&self) -> f64 {
        self.weights.values().map(|w| w * w).sum::<f64>().sqrt()
    }
}

/// Tag to smoothed inverse document frequency.
///
/// Computed once per catalog snapshot and replaced wholesale, never edited.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdfDict {
    idf: HashMap<String, f64>,
    documents: usize,
}

impl IdfDict {
    /// IDF of a tag, `1.0` for tags the corpus has never seen
    pub fn get(&self, tag: &str) -> f64 {
        self.idf.get(&tag.to_lowercase()).copied().unwrap_or(1.0)
    }

    pub fn documents(&self) -> usize {
        self.documents
    }

    pub fn len(&self) -> usize {
        self.idf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idf.is_empty()
    }
}

/// Fixed weights of each feature family in weighted vectorization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureWeights {
    pub tag: f64,
    pub category: f64,
    pub model: f64,
    pub language: f64,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            tag: 1.0,
            category: 0.8,
            model: 0.6,
            language: 0.5,
        }
    }
}

impl From<&EngineConfig> for FeatureWeights {
    fn from(config: &EngineConfig) -> Self {
        Self {
            tag: config.tag_weight,
            category: config.category_weight,
            model: config.model_weight,
            language: config.language_weight,
        }
    }
}

fn normalize_key(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_lowercase())
    }
}

/// Adds the category, model and language keys with the given weights
fn add_attributes(raw: &mut HashMap<String, f64>, features: &ContentFeatures, weights: [f64; 3]) {
    let attributes = [
        ("cat", &features.category),
        ("model", &features.model),
        ("lang", &features.language),
    ];
    for ((prefix, value), weight) in attributes.into_iter().zip(weights) {
        if let Some(value) = normalize_key(value) {
            *raw.entry(format!("{}:{}", prefix, value)).or_insert(0.0) += weight;
        }
    }
}

/// Plain vectorization: weight 1 per distinct tag and per present attribute
pub fn build_vector(features: &ContentFeatures) -> SparseVector {
    let mut raw = HashMap::new();

    for tag in features.tags.iter().filter_map(|t| normalize_key(t)) {
        raw.insert(format!("tag:{}", tag), 1.0);
    }
    add_attributes(&mut raw, features, [1.0, 1.0, 1.0]);

    SparseVector::normalized(raw)
}

/// Corpus-aware vectorization.
///
/// Each distinct tag gets `(1 + ln(count)) * idf * weights.tag`; attributes get
/// their fixed family weight.
pub fn build_vector_weighted(
    features: &ContentFeatures,
    idf: &IdfDict,
    weights: &FeatureWeights,
) -> SparseVector {
    let mut counts: HashMap<String, u32> = HashMap::new();
    for tag in features.tags.iter().filter_map(|t| normalize_key(t)) {
        *counts.entry(tag).or_insert(0) += 1;
    }

    let mut raw = HashMap::with_capacity(counts.len() + 3);
    for (tag, count) in counts {
        let tf = 1.0 + f64::from(count).ln();
        let weight = tf * idf.get(&tag) * weights.tag;
        raw.insert(format!("tag:{}", tag), weight);
    }
    add_attributes(
        &mut raw,
        features,
        [weights.category, weights.model, weights.language],
    );

    SparseVector::normalized(raw)
}

/// Smoothed IDF over a corpus: `ln((N + 1) / (df + 1)) + 1`
pub fn compute_idf<'a, I>(corpus: I) -> IdfDict
where
    I: IntoIterator<Item = &'a ContentFeatures>,
{
    let mut document_frequency: HashMap<String, usize> = HashMap::new();
    let mut documents = 0usize;

    for features in corpus {
        documents += 1;
        let mut distinct: Vec<String> = features
            .tags
            .iter()
            .filter_map(|t| normalize_key(t))
            .collect();
        distinct.sort_unstable();
        distinct.dedup();
        for tag in distinct {
            *document_frequency.entry(tag).or_insert(0) += 1;
        }
    }

    let n = documents.max(1) as f64;
    let idf = document_frequency
        .into_iter()
        .map(|(tag, df)| {
            let value = ((n + 1.0) / (df as f64 + 1.0)).ln() + 1.0;
            (tag, value)
        })
        .collect();

    IdfDict { idf, documents }
}
