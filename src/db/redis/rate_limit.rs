use async_trait::async_trait;
use redis::{Client, Script};
use std::time::Duration;

use crate::db::{RateLimitStore, SlotClaim, WindowHit};
use crate::error::AppResult;

// Increments a fixed window counter, starting its expiry on the first hit.
// Returns {count, remaining ttl in ms}.
const WINDOW_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Rate limiter state stored in Redis.
///
/// A cooldown claim is a single `SET NX PX`, so Redis itself arbitrates
/// concurrent claims of the same slot.
#[derive(Clone)]
pub struct RedisRateLimiter {
    redis_client: Client,
    window_script: Script,
}

impl RedisRateLimiter {
    pub fn new(redis_client: Client) -> Self {
        Self {
            redis_client,
            window_script: Script::new(WINDOW_SCRIPT),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl RateLimitStore for RedisRateLimiter {
    async fn claim_slot(&self, key: &str, cooldown: Duration) -> AppResult<SlotClaim> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let cooldown_ms = millis(cooldown);

        let claimed: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(chrono::Utc::now().timestamp_millis())
            .arg("NX")
            .arg("PX")
            .arg(cooldown_ms)
            .query_async(&mut conn)
            .await?;

        if claimed.is_some() {
            return Ok(SlotClaim::Claimed);
        }

        let ttl_ms: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        // The key can expire between SET and PTTL; report the shortest wait
        let retry_after = if ttl_ms > 0 {
            Duration::from_millis(ttl_ms as u64)
        } else {
            Duration::from_millis(1)
        };

        Ok(SlotClaim::Held { retry_after })
    }

    async fn release_slot(&self, key: &str) -> AppResult<()> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let _: () = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    async fn hit_window(&self, key: &str, window: Duration) -> AppResult<WindowHit> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;

        let (count, ttl_ms): (u64, i64) = self
            .window_script
            .key(key)
            .arg(millis(window))
            .invoke_async(&mut conn)
            .await?;

        Ok(WindowHit {
            count,
            resets_in: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }
}
