use serde::{Deserialize, Serialize};

mod interaction;
mod prompt;

pub use interaction::{Interaction, InteractionPolicy, InteractionType, INTERACTION_CONFIG};
pub use prompt::{ContentFeatures, EngagementCounts, Prompt};

/// The caller of a request, as established by the upstream identity layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Viewer {
    /// Authenticated user id; `None` for anonymous callers
    pub user_id: Option<String>,
}

impl Viewer {
    pub fn anonymous() -> Self {
        Self { user_id: None }
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }
}

/// Parameters of one recommendation request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecommendationQuery {
    /// Recommend as if for this user; must equal the caller when set
    #[serde(rename = "for", default)]
    pub for_user: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Free-text filter applied before scoring
    #[serde(default)]
    pub q: Option<String>,
}

/// A prompt as returned to the client, with display-only metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedPrompt {
    #[serde(flatten)]
    pub prompt: Prompt,
    /// Supplied by the view-tracking service; never used for ranking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
}

/// One entry of a ranked recommendation list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub id: String,
    /// `base_score * diversity_penalty`
    pub score: f64,
    pub base_score: f64,
    pub diversity_penalty: f64,
    pub item: RecommendedPrompt,
}
