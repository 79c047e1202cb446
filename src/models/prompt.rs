use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A catalog item: a prompt with its categorical attributes and engagement counters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub saves: u64,
    #[serde(default)]
    pub comments: u64,
    /// Mean rating on a 0..=5 scale
    #[serde(default)]
    pub rating_avg: f64,
    #[serde(default)]
    pub rating_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Prompt {
    /// Creates a prompt with no attributes and no engagement
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            tags: Vec::new(),
            category: None,
            model: None,
            language: None,
            likes: 0,
            saves: 0,
            comments: 0,
            rating_avg: 0.0,
            rating_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The categorical attributes used for vectorization
    pub fn features(&self) -> ContentFeatures {
        ContentFeatures {
            tags: self.tags.clone(),
            category: self.category.clone().unwrap_or_default(),
            model: self.model.clone().unwrap_or_default(),
            language: self.language.clone().unwrap_or_default(),
        }
    }

    pub fn engagement(&self) -> EngagementCounts {
        EngagementCounts {
            likes: self.likes,
            saves: self.saves,
            comments: self.comments,
            rating_count: self.rating_count,
        }
    }
}

/// Raw categorical attributes of one item.
///
/// Empty strings mean "absent". Tags may repeat; repeats only matter in
/// weighted vectorization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentFeatures {
    pub tags: Vec<String>,
    pub category: String,
    pub model: String,
    pub language: String,
}

/// Engagement counters feeding the popularity score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngagementCounts {
    pub likes: u64,
    pub saves: u64,
    pub comments: u64,
    pub rating_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_features_map_missing_attributes_to_empty() {
        let mut prompt = Prompt::new("p1", "Refactor helper");
        prompt.tags = vec!["Rust".to_string()];
        prompt.model = Some("gpt-4".to_string());

        let features = prompt.features();
        assert_eq!(features.tags, vec!["Rust".to_string()]);
        assert_eq!(features.category, "");
        assert_eq!(features.model, "gpt-4");
        assert_eq!(features.language, "");
    }

    #[test]
    fn test_prompt_serializes_camel_case() {
        let mut prompt = Prompt::new("p1", "Title");
        prompt.rating_count = 3;
        let json = serde_json::to_value(&prompt).unwrap();
        assert_eq!(json["ratingCount"], 3);
        assert!(json.get("createdAt").is_some());
    }
}
