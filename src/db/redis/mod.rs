pub mod cache;
pub mod rate_limit;

pub use cache::create_redis_client;
pub use cache::CacheKey;
pub use cache::{CacheWriterHandle, RedisCache};
pub use rate_limit::RedisRateLimiter;
