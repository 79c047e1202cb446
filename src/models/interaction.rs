use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};
use uuid::Uuid;

/// Kind of user interaction with a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionType {
    View,
    Open,
    Like,
    Save,
    Copy,
    Rate,
}

/// Ingestion policy and relevance weight of one interaction type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InteractionPolicy {
    /// Events allowed per actor and type within `window_secs`, across all items
    pub max_per_window: u32,
    pub window_secs: u64,
    /// Cooldown between two events for the same actor, item and type
    pub min_interval_secs: u64,
    /// Base weight of the signal in profile building
    pub weight: f64,
}

/// Per-type policy table.
///
/// `Copy` is the strongest and most tightly limited signal; `View` is the
/// weakest and most permissive.
pub const INTERACTION_CONFIG: [(InteractionType, InteractionPolicy); 6] = [
    (
        InteractionType::View,
        InteractionPolicy {
            max_per_window: 120,
            window_secs: 3600,
            min_interval_secs: 300,
            weight: 0.5,
        },
    ),
    (
        InteractionType::Open,
        InteractionPolicy {
            max_per_window: 60,
            window_secs: 3600,
            min_interval_secs: 60,
            weight: 1.0,
        },
    ),
    (
        InteractionType::Like,
        InteractionPolicy {
            max_per_window: 30,
            window_secs: 3600,
            min_interval_secs: 10,
            weight: 2.0,
        },
    ),
    (
        InteractionType::Save,
        InteractionPolicy {
            max_per_window: 30,
            window_secs: 3600,
            min_interval_secs: 10,
            weight: 2.0,
        },
    ),
    (
        InteractionType::Copy,
        InteractionPolicy {
            max_per_window: 10,
            window_secs: 3600,
            min_interval_secs: 30,
            weight: 3.0,
        },
    ),
    (
        InteractionType::Rate,
        InteractionPolicy {
            max_per_window: 20,
            window_secs: 3600,
            min_interval_secs: 60,
            weight: 2.0,
        },
    ),
];

impl InteractionType {
    pub const ALL: [InteractionType; 6] = [
        InteractionType::View,
        InteractionType::Open,
        InteractionType::Like,
        InteractionType::Save,
        InteractionType::Copy,
        InteractionType::Rate,
    ];

    pub fn policy(self) -> InteractionPolicy {
        // The table is ordered like the enum
        INTERACTION_CONFIG[self as usize].1
    }

    pub fn weight(self) -> f64 {
        self.policy().weight
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InteractionType::View => "view",
            InteractionType::Open => "open",
            InteractionType::Like => "like",
            InteractionType::Save => "save",
            InteractionType::Copy => "copy",
            InteractionType::Rate => "rate",
        }
    }
}

impl Display for InteractionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InteractionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InteractionType::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown interaction type: {}", s))
    }
}

/// One recorded interaction. The log is append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub id: Uuid,
    pub actor_id: String,
    pub item_id: String,
    #[serde(rename = "type")]
    pub kind: InteractionType,
    pub weight: f64,
    pub created_at: DateTime<Utc>,
}

impl Interaction {
    /// Creates an interaction carrying the configured weight of its type
    pub fn new(
        actor_id: impl Into<String>,
        item_id: impl Into<String>,
        kind: InteractionType,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id: actor_id.into(),
            item_id: item_id.into(),
            kind,
            weight: kind.weight(),
            created_at,
        }
    }
}
