//! Persistence collaborators.
//!
//! The engine only talks to these traits. Postgres and Redis back them in
//! production; [`memory`] backs them for local runs and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::{
    error::AppResult,
    models::{Interaction, Prompt},
};

pub mod memory;
pub mod postgres;
pub mod redis;

pub use postgres::{create_pool, PgStore};
pub use redis::{create_redis_client, CacheKey, RedisCache, RedisRateLimiter};

/// Read access to the prompt catalog
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PromptCatalog: Send + Sync {
    async fn list_prompts(&self) -> AppResult<Vec<Prompt>>;

    async fn get_prompt(&self, id: &str) -> AppResult<Option<Prompt>>;
}

/// Append-only interaction log
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InteractionLog: Send + Sync {
    async fn append(&self, interaction: &Interaction) -> AppResult<()>;

    /// Interactions of one actor, oldest first, optionally only those at or after `since`
    async fn for_actor(
        &self,
        actor_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<Interaction>>;
}

/// Key-value store for computed responses
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> AppResult<Option<String>>;

    async fn set(&self, key: &CacheKey, value: String, ttl_secs: u64) -> AppResult<()>;
}

/// Result of trying to claim a cooldown slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotClaim {
    /// No claim within the cooldown; the slot now belongs to the caller
    Claimed,
    /// Claimed recently; free again after `retry_after`
    Held { retry_after: Duration },
}

/// State of a fixed window counter after one hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    pub count: u64,
    pub resets_in: Duration,
}

/// Storage for ingestion rate limits.
///
/// `claim_slot` must be atomic: two concurrent claims of the same key within
/// the cooldown can never both succeed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn claim_slot(&self, key: &str, cooldown: Duration) -> AppResult<SlotClaim>;

    /// Frees a claimed slot, e.g. when the claimed event was never stored
    async fn release_slot(&self, key: &str) -> AppResult<()>;

    async fn hit_window(&self, key: &str, window: Duration) -> AppResult<WindowHit>;
}
