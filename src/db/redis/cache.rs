use async_trait::async_trait;
use redis::AsyncCommands;
use redis::Client;
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::db::ResponseCache;
use crate::error::AppResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// A ranked list for one viewer (`None` = anonymous), normalized query and size
    Recommendations {
        viewer: Option<String>,
        query: Option<String>,
        limit: usize,
    },
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::Recommendations {
                viewer,
                query,
                limit,
            } => {
                // Length-prefixing the viewer keeps ids containing ':' unambiguous
                match viewer {
                    Some(id) => write!(f, "recs:u{}:{}", id.len(), id)?,
                    None => write!(f, "recs:anon")?,
                }
                write!(f, ":{}", limit)?;
                match query {
                    Some(q) => write!(f, ":q:{}", q),
                    None => write!(f, ":all"),
                }
            }
        }
    }
}

/// Creates a Redis client for caching
///
/// Establishes a connection to Redis for fast data caching.
/// Uses connection pooling via the connection-manager feature.
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Upper bound on how long shutdown waits for queued writes to reach Redis
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Message for asynchronous cache writes
struct CacheWriteMessage {
    key: String,
    value: String,
    ttl: u64,
}

/// Response cache backed by Redis
///
/// Reads go straight to Redis; writes are queued to a background task so a
/// slow Redis never delays a response.
#[derive(Clone)]
pub struct RedisCache {
    redis_client: Client,
    write_tx: mpsc::UnboundedSender<CacheWriteMessage>,
}

/// Handle for gracefully shutting down the cache writer
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl CacheWriterHandle {
    /// Gracefully shuts down the cache writer
    ///
    /// Signals the writer task and waits, bounded by a timeout, until it has
    /// flushed all pending writes to Redis and exited.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Cache writer shutdown signal sent");

        match tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, self.task).await {
            Ok(Ok(())) => tracing::info!("Cache writer flushed"),
            Ok(Err(e)) => tracing::error!(error = %e, "Cache writer task failed"),
            Err(_) => tracing::warn!("Timed out waiting for cache writer to flush"),
        }
    }
}

impl RedisCache {
    /// Creates a new cache and spawns its background writer
    pub fn new(redis_client: Client) -> (Self, CacheWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let client = redis_client.clone();
        let task = tokio::spawn(async move {
            Self::cache_writer_task(client, write_rx, shutdown_rx).await;
        });

        let cache = Self {
            redis_client,
            write_tx,
        };

        (cache, CacheWriterHandle { shutdown_tx, task })
    }

    /// Background task that drains the write queue into Redis
    ///
    /// On shutdown it stops accepting new work and flushes whatever is queued.
    async fn cache_writer_task(
        client: Client,
        mut write_rx: mpsc::UnboundedReceiver<CacheWriteMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Cache writer task started");

        loop {
            tokio::select! {
                Some(msg) = write_rx.recv() => {
                    if let Err(e) = Self::write_to_redis(&client, msg).await {
                        tracing::warn!(error = %e, "Failed to write recommendation cache entry");
                    }
                }
                _ = shutdown_rx.recv() => {
                    write_rx.close();
                    let mut flushed = 0usize;
                    while let Some(msg) = write_rx.recv().await {
                        if let Err(e) = Self::write_to_redis(&client, msg).await {
                            tracing::warn!(error = %e, "Failed to flush cache write during shutdown");
                        } else {
                            flushed += 1;
                        }
                    }
                    tracing::info!(flushed, "Cache writer task stopped");
                    break;
                }
            }
        }
    }

    /// Writes a single message to Redis
    async fn write_to_redis(client: &Client, msg: CacheWriteMessage) -> AppResult<()> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: () = conn.set_ex(msg.key, msg.value, msg.ttl).await?;
        Ok(())
    }
}

#[async_trait]
impl ResponseCache for RedisCache {
    async fn get(&self, key: &CacheKey) -> AppResult<Option<String>> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let cached: Option<String> = conn.get(key.to_string()).await?;
        Ok(cached)
    }

    async fn set(&self, key: &CacheKey, value: String, ttl_secs: u64) -> AppResult<()> {
        let msg = CacheWriteMessage {
            key: key.to_string(),
            value,
            ttl: ttl_secs.max(1),
        };

        self.write_tx
            .send(msg)
            .map_err(|_| crate::error::AppError::Internal("cache writer stopped".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(viewer: Option<&str>, query: Option<&str>, limit: usize) -> CacheKey {
        CacheKey::Recommendations {
            viewer: viewer.map(str::to_string),
            query: query.map(str::to_string),
            limit,
        }
    }

    #[test]
    fn test_cache_key_display_anonymous_without_query() {
        assert_eq!(key(None, None, 20).to_string(), "recs:anon:20:all");
    }

    #[test]
    fn test_cache_key_display_user_with_query() {
        assert_eq!(
            key(Some("user-1"), Some("rust cli"), 5).to_string(),
            "recs:u6:user-1:5:q:rust cli"
        );
    }

    #[test]
    fn test_cache_key_query_presence_changes_key() {
        assert_ne!(key(Some("u"), None, 5).to_string(), key(Some("u"), Some("all"), 5).to_string());
        assert_ne!(
            key(Some("u"), Some("a"), 5).to_string(),
            key(Some("u"), Some("b"), 5).to_string()
        );
    }

    #[test]
    fn test_cache_key_viewer_with_separator_is_unambiguous() {
        assert_ne!(
            key(Some("a:5"), None, 1).to_string(),
            key(Some("a"), None, 51).to_string()
        );
    }

    #[test]
    fn test_cache_key_anonymous_differs_from_user_named_anon() {
        assert_ne!(key(None, None, 1).to_string(), key(Some("anon"), None, 1).to_string());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_writer_to_exit() {
        // nothing listens on port 1, so the queued write fails fast
        let client = create_redis_client("redis://127.0.0.1:1/").unwrap();
        let (cache, handle) = RedisCache::new(client);

        cache
            .set(&key(None, None, 1), "[]".to_string(), 60)
            .await
            .unwrap();
        handle.shutdown().await;

        // the writer has drained its queue and dropped the receiver
        assert!(cache
            .set(&key(None, None, 2), "[]".to_string(), 60)
            .await
            .is_err());
    }

    // Requires a running Redis; set REDIS_URL to point elsewhere
    #[tokio::test]
    #[ignore]
    async fn test_set_then_get_round_trips_through_redis() {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

        let client = create_redis_client(&redis_url).unwrap();
        let (cache, handle) = RedisCache::new(client.clone());

        let key = key(Some("redis-test"), Some("round trip"), 3);
        cache.set(&key, "[]".to_string(), 60).await.unwrap();
        handle.shutdown().await;

        assert_eq!(cache.get(&key).await.unwrap().as_deref(), Some("[]"));

        let mut conn = client.get_multiplexed_async_connection().await.unwrap();
        let _: () = conn.del(key.to_string()).await.unwrap();
    }
}
