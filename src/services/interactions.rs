use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    db::{InteractionLog, PromptCatalog, RateLimitStore, SlotClaim},
    error::{AppError, AppResult},
    models::{Interaction, InteractionType, Viewer},
    services::metrics::MetricsSink,
};

const ANON_PREFIX: &str = "anon:";
const ANON_HEX_LEN: usize = 32;
const FINGERPRINT_SEPARATOR: &str = "\u{1f}";

/// Network and client signals accompanying an ingestion request
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: String,
}

/// Body of `POST /interactions`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionPayload {
    pub item_id: String,
    #[serde(rename = "type")]
    pub kind: InteractionType,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Why an interaction was not recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateLimitReason {
    /// Same actor, item and type inside the cooldown
    TooFrequent,
    /// Too many events of this type by the actor inside the longer window
    WindowExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RateLimitReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl RateLimitDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            retry_after_seconds: None,
        }
    }

    fn reject(reason: RateLimitReason, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            retry_after_seconds: Some(retry_after_seconds(retry_after)),
        }
    }
}

/// Result of an ingestion attempt; rate limiting is an expected outcome, not an error
#[derive(Debug, Clone, PartialEq)]
pub enum InteractionOutcome {
    Recorded(Interaction),
    RateLimited {
        reason: RateLimitReason,
        retry_after_seconds: u64,
    },
}

/// Whole seconds to wait, rounded up and never zero
fn retry_after_seconds(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

/// Stable pseudonymous actor id for a caller without an account.
///
/// `anon:` followed by the first 32 hex chars of SHA-256 over ip and user agent.
pub fn create_anonymous_actor_id(ip: &str, user_agent: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ip.as_bytes());
    hasher.update(FINGERPRINT_SEPARATOR.as_bytes());
    hasher.update(user_agent.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}{}", ANON_PREFIX, &digest[..ANON_HEX_LEN])
}

/// Cooldown slot for one (actor, item, type) triple
fn slot_key(actor_id: &str, item_id: &str, kind: InteractionType) -> String {
    format!("ratelimit:{}:{}:{}:{}", kind, actor_id.len(), actor_id, item_id)
}

/// Longer window counter for one (actor, type) pair
fn window_key(actor_id: &str, kind: InteractionType) -> String {
    format!("ratelimit:window:{}:{}", kind, actor_id)
}

/// Records interactions with per-actor abuse limits
pub struct InteractionService {
    catalog: Arc<dyn PromptCatalog>,
    log: Arc<dyn InteractionLog>,
    limiter: Arc<dyn RateLimitStore>,
    metrics: Arc<dyn MetricsSink>,
}

impl InteractionService {
    pub fn new(
        catalog: Arc<dyn PromptCatalog>,
        log: Arc<dyn InteractionLog>,
        limiter: Arc<dyn RateLimitStore>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            catalog,
            log,
            limiter,
            metrics,
        }
    }

    /// The actor an interaction is attributed to
    pub fn resolve_actor(viewer: &Viewer, context: &ClientContext) -> String {
        match &viewer.user_id {
            Some(user_id) => user_id.clone(),
            None => create_anonymous_actor_id(
                context.ip.as_deref().unwrap_or("unknown"),
                context.user_agent.as_deref().unwrap_or(""),
            ),
        }
    }

    /// Claims the cooldown slot of an (actor, item, type) triple.
    ///
    /// Triples are independent of each other. If the store is unreachable the
    /// event is allowed.
    pub async fn check_interaction_rate_limit(
        &self,
        actor_id: &str,
        item_id: &str,
        kind: InteractionType,
    ) -> RateLimitDecision {
        let cooldown = Duration::from_secs(kind.policy().min_interval_secs);
        let key = slot_key(actor_id, item_id, kind);

        match self.limiter.claim_slot(&key, cooldown).await {
            Ok(SlotClaim::Claimed) => RateLimitDecision::allow(),
            Ok(SlotClaim::Held { retry_after }) => {
                RateLimitDecision::reject(RateLimitReason::TooFrequent, retry_after)
            }
            Err(e) => {
                tracing::warn!(error = %e, actor_id = %actor_id, "Rate limit store error (allowing interaction)");
                RateLimitDecision::allow()
            }
        }
    }

    /// Counts one event against the actor's longer window for this type
    async fn check_window_limit(&self, actor_id: &str, kind: InteractionType) -> RateLimitDecision {
        let policy = kind.policy();
        let window = Duration::from_secs(policy.window_secs);

        match self.limiter.hit_window(&window_key(actor_id, kind), window).await {
            Ok(hit) if hit.count > u64::from(policy.max_per_window) => {
                RateLimitDecision::reject(RateLimitReason::WindowExceeded, hit.resets_in)
            }
            Ok(_) => RateLimitDecision::allow(),
            Err(e) => {
                tracing::warn!(error = %e, actor_id = %actor_id, "Rate window store error (allowing interaction)");
                RateLimitDecision::allow()
            }
        }
    }

    async fn release_slot(&self, actor_id: &str, item_id: &str, kind: InteractionType) {
        if let Err(e) = self.limiter.release_slot(&slot_key(actor_id, item_id, kind)).await {
            tracing::warn!(error = %e, actor_id = %actor_id, "Failed to release rate limit slot");
        }
    }

    /// Validates, rate-limits and appends one interaction
    pub async fn record_interaction(
        &self,
        viewer: &Viewer,
        payload: InteractionPayload,
        context: &ClientContext,
    ) -> AppResult<InteractionOutcome> {
        if let Some(claimed) = payload.user_id.as_deref() {
            if viewer.user_id.as_deref() != Some(claimed) {
                return Err(AppError::Forbidden(
                    "cannot record interactions for another user".to_string(),
                ));
            }
        }

        let item_id = payload.item_id.trim();
        if item_id.is_empty() {
            return Err(AppError::InvalidInput("itemId must not be empty".to_string()));
        }
        if self.catalog.get_prompt(item_id).await?.is_none() {
            return Err(AppError::NotFound(format!("prompt {}", item_id)));
        }

        let actor_id = Self::resolve_actor(viewer, context);
        let kind = payload.kind;

        let mut decision = self.check_interaction_rate_limit(&actor_id, item_id, kind).await;
        if decision.allowed {
            decision = self.check_window_limit(&actor_id, kind).await;
            if !decision.allowed {
                // nothing gets stored, so the cooldown must not hold
                self.release_slot(&actor_id, item_id, kind).await;
            }
        }

        if let (false, Some(reason), Some(retry_after_seconds)) =
            (decision.allowed, decision.reason, decision.retry_after_seconds)
        {
            tracing::debug!(
                request_id = %context.request_id,
                actor_id = %actor_id,
                item_id = %item_id,
                kind = %kind,
                ?reason,
                retry_after_seconds,
                "Interaction rate limited"
            );
            self.metrics.increment("interactions.rate_limited", 1);
            return Ok(InteractionOutcome::RateLimited {
                reason,
                retry_after_seconds,
            });
        }

        let interaction = Interaction::new(actor_id, item_id, kind, Utc::now());
        if let Err(e) = self.log.append(&interaction).await {
            self.release_slot(&interaction.actor_id, item_id, kind).await;
            return Err(e);
        }
        self.metrics.increment("interactions.recorded", 1);

        tracing::info!(
            request_id = %context.request_id,
            actor_id = %interaction.actor_id,
            item_id = %interaction.item_id,
            kind = %kind,
            weight = interaction.weight,
            "Interaction recorded"
        );

        Ok(InteractionOutcome::Recorded(interaction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{MemoryCatalog, MemoryInteractionLog, MemoryRateLimiter};
    use crate::db::{MockInteractionLog, MockRateLimitStore, WindowHit};
    use crate::models::Prompt;
    use crate::services::metrics::InMemoryMetrics;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        service: InteractionService,
        log: Arc<MemoryInteractionLog>,
        metrics: Arc<InMemoryMetrics>,
    }

    fn harness() -> Harness {
        let catalog = Arc::new(MemoryCatalog::with_prompts(vec![
            Prompt::new("x", "X"),
            Prompt::new("y", "Y"),
        ]));
        let log = Arc::new(MemoryInteractionLog::new());
        let metrics = Arc::new(InMemoryMetrics::new());
        let service = InteractionService::new(
            catalog,
            log.clone(),
            Arc::new(MemoryRateLimiter::new()),
            metrics.clone(),
        );
        Harness {
            service,
            log,
            metrics,
        }
    }

    fn payload(item: &str, kind: InteractionType) -> InteractionPayload {
        InteractionPayload {
            item_id: item.to_string(),
            kind,
            user_id: None,
        }
    }

    fn context() -> ClientContext {
        ClientContext {
            ip: Some("203.0.113.7".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
            request_id: "req-1".to_string(),
        }
    }

    #[test]
    fn test_anonymous_actor_id_is_deterministic() {
        let a = create_anonymous_actor_id("1.2.3.4", "curl/8");
        let b = create_anonymous_actor_id("1.2.3.4", "curl/8");
        assert_eq!(a, b);
        assert!(a.starts_with("anon:"));
        assert_eq!(a.len(), "anon:".len() + 32);
        assert!(a["anon:".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_anonymous_actor_id_changes_with_either_input() {
        let base = create_anonymous_actor_id("1.2.3.4", "curl/8");
        assert_ne!(base, create_anonymous_actor_id("1.2.3.5", "curl/8"));
        assert_ne!(base, create_anonymous_actor_id("1.2.3.4", "curl/9"));
        // The separator keeps concatenation boundaries distinct
        assert_ne!(
            create_anonymous_actor_id("ab", "c"),
            create_anonymous_actor_id("a", "bc")
        );
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_seconds(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_seconds(Duration::from_secs(30)), 30);
        assert_eq!(retry_after_seconds(Duration::ZERO), 1);
    }

    #[test]
    fn test_slot_key_is_unambiguous() {
        assert_ne!(
            slot_key("a:b", "c", InteractionType::Like),
            slot_key("a", "b:c", InteractionType::Like)
        );
    }

    #[tokio::test]
    async fn test_rate_limit_first_call_allowed_repeat_blocked() {
        let h = harness();
        let first = h.service.check_interaction_rate_limit("u1", "x", InteractionType::Like).await;
        assert!(first.allowed);
        assert!(first.reason.is_none());

        let second = h.service.check_interaction_rate_limit("u1", "x", InteractionType::Like).await;
        assert!(!second.allowed);
        assert_eq!(second.reason, Some(RateLimitReason::TooFrequent));
        assert!(second.retry_after_seconds.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_rate_limit_triples_are_independent() {
        let h = harness();
        assert!(h.service.check_interaction_rate_limit("u1", "x", InteractionType::Copy).await.allowed);
        assert!(h.service.check_interaction_rate_limit("u1", "x", InteractionType::View).await.allowed);
        assert!(h.service.check_interaction_rate_limit("u1", "y", InteractionType::Copy).await.allowed);
        assert!(h.service.check_interaction_rate_limit("u2", "x", InteractionType::Copy).await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_expires_after_min_interval() {
        let h = harness();
        let kind = InteractionType::Like;
        assert!(h.service.check_interaction_rate_limit("u1", "x", kind).await.allowed);
        assert!(!h.service.check_interaction_rate_limit("u1", "x", kind).await.allowed);

        tokio::time::advance(Duration::from_secs(kind.policy().min_interval_secs)).await;
        assert!(h.service.check_interaction_rate_limit("u1", "x", kind).await.allowed);
    }

    #[tokio::test]
    async fn test_record_copy_twice_then_view() {
        let h = harness();
        let viewer = Viewer::user("A");

        let first = h
            .service
            .record_interaction(&viewer, payload("x", InteractionType::Copy), &context())
            .await
            .unwrap();
        match first {
            InteractionOutcome::Recorded(interaction) => {
                assert_eq!(interaction.actor_id, "A");
                assert_eq!(interaction.weight, InteractionType::Copy.weight());
            }
            other => panic!("expected recorded, got {:?}", other),
        }

        let second = h
            .service
            .record_interaction(&viewer, payload("x", InteractionType::Copy), &context())
            .await
            .unwrap();
        assert!(matches!(
            second,
            InteractionOutcome::RateLimited {
                reason: RateLimitReason::TooFrequent,
                retry_after_seconds
            } if retry_after_seconds > 0
        ));

        let view = h
            .service
            .record_interaction(&viewer, payload("x", InteractionType::View), &context())
            .await
            .unwrap();
        assert!(matches!(view, InteractionOutcome::Recorded(_)));

        assert_eq!(h.log.len().await, 2);
        assert_eq!(h.metrics.counter("interactions.recorded"), 2);
        assert_eq!(h.metrics.counter("interactions.rate_limited"), 1);
    }

    #[tokio::test]
    async fn test_anonymous_interactions_use_fingerprint() {
        let h = harness();
        let outcome = h
            .service
            .record_interaction(&Viewer::anonymous(), payload("x", InteractionType::Open), &context())
            .await
            .unwrap();
        let InteractionOutcome::Recorded(interaction) = outcome else {
            panic!("expected recorded interaction");
        };
        assert_eq!(
            interaction.actor_id,
            create_anonymous_actor_id("203.0.113.7", "Mozilla/5.0")
        );
    }

    #[tokio::test]
    async fn test_unknown_item_is_not_found() {
        let h = harness();
        let result = h
            .service
            .record_interaction(&Viewer::user("A"), payload("missing", InteractionType::Like), &context())
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(h.log.is_empty().await);
    }

    #[tokio::test]
    async fn test_user_id_must_match_caller() {
        let h = harness();
        let mut spoofed = payload("x", InteractionType::Like);
        spoofed.user_id = Some("B".to_string());

        let as_other = h
            .service
            .record_interaction(&Viewer::user("A"), spoofed.clone(), &context())
            .await;
        assert!(matches!(as_other, Err(AppError::Forbidden(_))));

        let as_anonymous = h
            .service
            .record_interaction(&Viewer::anonymous(), spoofed.clone(), &context())
            .await;
        assert!(matches!(as_anonymous, Err(AppError::Forbidden(_))));

        let as_self = h
            .service
            .record_interaction(&Viewer::user("B"), spoofed, &context())
            .await
            .unwrap();
        assert!(matches!(as_self, InteractionOutcome::Recorded(_)));
    }

    #[tokio::test]
    async fn test_window_limit_rejects_burst_across_items() {
        let catalog = Arc::new(MemoryCatalog::with_prompts(
            (0..20).map(|i| Prompt::new(format!("p{}", i), "P")),
        ));
        let service = InteractionService::new(
            catalog,
            Arc::new(MemoryInteractionLog::new()),
            Arc::new(MemoryRateLimiter::new()),
            Arc::new(InMemoryMetrics::new()),
        );
        let viewer = Viewer::user("A");
        let max = InteractionType::Copy.policy().max_per_window as usize;

        for i in 0..max {
            let outcome = service
                .record_interaction(&viewer, payload(&format!("p{}", i), InteractionType::Copy), &context())
                .await
                .unwrap();
            assert!(matches!(outcome, InteractionOutcome::Recorded(_)));
        }

        let over = service
            .record_interaction(&viewer, payload(&format!("p{}", max), InteractionType::Copy), &context())
            .await
            .unwrap();
        assert!(matches!(
            over,
            InteractionOutcome::RateLimited {
                reason: RateLimitReason::WindowExceeded,
                ..
            }
        ));

        // the rejected event did not keep its cooldown slot
        let slot = service
            .check_interaction_rate_limit("A", &format!("p{}", max), InteractionType::Copy)
            .await;
        assert!(slot.allowed);
    }

    #[tokio::test]
    async fn test_limiter_failure_allows_interaction() {
        let mut limiter = MockRateLimitStore::new();
        limiter
            .expect_claim_slot()
            .returning(|_, _| Err(AppError::Internal("redis down".to_string())));
        limiter.expect_hit_window().returning(|_, window| {
            Ok(WindowHit {
                count: 1,
                resets_in: window,
            })
        });

        let mut log = MockInteractionLog::new();
        log.expect_append().times(1).returning(|_| Ok(()));

        let service = InteractionService::new(
            Arc::new(MemoryCatalog::with_prompts(vec![Prompt::new("x", "X")])),
            Arc::new(log),
            Arc::new(limiter),
            Arc::new(InMemoryMetrics::new()),
        );

        let outcome = service
            .record_interaction(&Viewer::user("A"), payload("x", InteractionType::Like), &context())
            .await
            .unwrap();
        assert!(matches!(outcome, InteractionOutcome::Recorded(_)));
    }

    #[tokio::test]
    async fn test_log_failure_propagates() {
        let mut log = MockInteractionLog::new();
        log.expect_append()
            .returning(|_| Err(AppError::Internal("disk full".to_string())));

        let service = InteractionService::new(
            Arc::new(MemoryCatalog::with_prompts(vec![Prompt::new("x", "X")])),
            Arc::new(log),
            Arc::new(MemoryRateLimiter::new()),
            Arc::new(InMemoryMetrics::new()),
        );

        let result = service
            .record_interaction(&Viewer::user("A"), payload("x", InteractionType::Like), &context())
            .await;
        assert!(matches!(result, Err(AppError::Internal(_))));
    }

    #[tokio::test]
    async fn test_failed_append_does_not_block_retry() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut log = MockInteractionLog::new();
        let counter = attempts.clone();
        log.expect_append().times(2).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AppError::Internal("transient".to_string()))
            } else {
                Ok(())
            }
        });
        let metrics = Arc::new(InMemoryMetrics::new());

        let service = InteractionService::new(
            Arc::new(MemoryCatalog::with_prompts(vec![Prompt::new("x", "X")])),
            Arc::new(log),
            Arc::new(MemoryRateLimiter::new()),
            metrics.clone(),
        );
        let viewer = Viewer::user("A");

        let first = service
            .record_interaction(&viewer, payload("x", InteractionType::View), &context())
            .await;
        assert!(matches!(first, Err(AppError::Internal(_))));

        let retry = service
            .record_interaction(&viewer, payload("x", InteractionType::View), &context())
            .await
            .unwrap();
        assert!(matches!(retry, InteractionOutcome::Recorded(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.counter("interactions.rate_limited"), 0);
        assert_eq!(metrics.counter("interactions.recorded"), 1);
    }

    #[tokio::test]
    async fn test_window_rejection_releases_claimed_slot() {
        let mut limiter = MockRateLimitStore::new();
        limiter
            .expect_claim_slot()
            .times(1)
            .returning(|_, _| Ok(SlotClaim::Claimed));
        limiter.expect_hit_window().times(1).returning(|_, window| {
            Ok(WindowHit {
                count: u64::MAX,
                resets_in: window,
            })
        });
        limiter
            .expect_release_slot()
            .withf(|key| key.to_string() == slot_key("A", "x", InteractionType::Save))
            .times(1)
            .returning(|_| Ok(()));

        let mut log = MockInteractionLog::new();
        log.expect_append().times(0);

        let service = InteractionService::new(
            Arc::new(MemoryCatalog::with_prompts(vec![Prompt::new("x", "X")])),
            Arc::new(log),
            Arc::new(limiter),
            Arc::new(InMemoryMetrics::new()),
        );

        let outcome = service
            .record_interaction(&Viewer::user("A"), payload("x", InteractionType::Save), &context())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            InteractionOutcome::RateLimited {
                reason: RateLimitReason::WindowExceeded,
                ..
            }
        ));
    }
}
