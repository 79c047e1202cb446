use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use super::{
    CacheKey, InteractionLog, PromptCatalog, RateLimitStore, ResponseCache, SlotClaim, WindowHit,
};
use crate::{
    error::AppResult,
    models::{Interaction, Prompt},
};

/// Prompt catalog held in memory, listed in id order
#[derive(Default)]
pub struct MemoryCatalog {
    prompts: RwLock<BTreeMap<String, Prompt>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prompts(prompts: impl IntoIterator<Item = Prompt>) -> Self {
        Self {
            prompts: RwLock::new(prompts.into_iter().map(|p| (p.id.clone(), p)).collect()),
        }
    }

    /// Inserts or replaces a prompt
    pub async fn upsert(&self, prompt: Prompt) {
        self.prompts.write().await.insert(prompt.id.clone(), prompt);
    }
}

#[async_trait]
impl PromptCatalog for MemoryCatalog {
    async fn list_prompts(&self) -> AppResult<Vec<Prompt>> {
        Ok(self.prompts.read().await.values().cloned().collect())
    }

    async fn get_prompt(&self, id: &str) -> AppResult<Option<Prompt>> {
        Ok(self.prompts.read().await.get(id).cloned())
    }
}

/// Interaction log held in memory
#[derive(Default)]
pub struct MemoryInteractionLog {
    interactions: RwLock<Vec<Interaction>>,
}

impl MemoryInteractionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.interactions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.interactions.read().await.is_empty()
    }
}

#[async_trait]
impl InteractionLog for MemoryInteractionLog {
    async fn append(&self, interaction: &Interaction) -> AppResult<()> {
        self.interactions.write().await.push(interaction.clone());
        Ok(())
    }

    async fn for_actor(
        &self,
        actor_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<Interaction>> {
        let mut matching: Vec<Interaction> = self
            .interactions
            .read()
            .await
            .iter()
            .filter(|i| i.actor_id == actor_id)
            .filter(|i| since.map_or(true, |since| i.created_at >= since))
            .cloned()
            .collect();
        matching.sort_by_key(|i| i.created_at);
        Ok(matching)
    }
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Response cache held in memory, with TTL and a write counter
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    writes: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `set` calls so far
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Keys of live entries, sorted
    pub async fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.expires_at > now)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> AppResult<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&key.to_string())
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &CacheKey, value: String, ttl_secs: u64) -> AppResult<()> {
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            expires_at: now + Duration::from_secs(ttl_secs),
        };
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(key.to_string(), entry);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Rate-limit state held in memory.
///
/// Each operation runs under a single lock, which makes check-and-set atomic.
/// Expired slots and windows are dropped on every write.
#[derive(Default)]
pub struct MemoryRateLimiter {
    /// slot key -> when the slot frees up
    slots: Mutex<HashMap<String, Instant>>,
    /// window key -> (when the window resets, hits so far)
    windows: Mutex<HashMap<String, (Instant, u64)>>,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimiter {
    async fn claim_slot(&self, key: &str, cooldown: Duration) -> AppResult<SlotClaim> {
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        slots.retain(|_, free_at| *free_at > now);

        if let Some(free_at) = slots.get(key) {
            return Ok(SlotClaim::Held {
                retry_after: *free_at - now,
            });
        }

        slots.insert(key.to_string(), now + cooldown);
        Ok(SlotClaim::Claimed)
    }

    async fn release_slot(&self, key: &str) -> AppResult<()> {
        self.slots.lock().await.remove(key);
        Ok(())
    }

    async fn hit_window(&self, key: &str, window: Duration) -> AppResult<WindowHit> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        windows.retain(|_, (resets_at, _)| *resets_at > now);

        let (resets_at, count) = windows.entry(key.to_string()).or_insert((now + window, 0));
        *count += 1;

        Ok(WindowHit {
            count: *count,
            resets_in: *resets_at - now,
        })
    }
}
