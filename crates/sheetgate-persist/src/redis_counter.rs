//! Redis-backed rate-window counters
//!
//! Shared by every gateway instance, so per-minute limits hold across the
//! fleet rather than per process.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tracing::info;

use sheetgate_core::{CounterStore, StoreError};

/// INCR, and set the expiry only when the key was just created
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

fn redis_error(e: redis::RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        StoreError::Connection(e.to_string())
    } else if e.is_timeout() {
        StoreError::Timeout(Duration::ZERO)
    } else {
        StoreError::Query(e.to_string())
    }
}

/// Counter store over a multiplexed Redis connection
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: MultiplexedConnection,
    script: redis::Script,
}

impl RedisCounterStore {
    /// Open a client and establish the multiplexed connection
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(redis_error)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(redis_error)?;
        info!("Connected to Redis for rate windows");
        Ok(Self {
            conn,
            script: redis::Script::new(INCREMENT_SCRIPT),
        })
    }
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn increment_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let count: i64 = self
            .script
            .key(key)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_sets_expiry_only_on_create() {
        let set_expiry = INCREMENT_SCRIPT.find("EXPIRE").unwrap();
        let guard = INCREMENT_SCRIPT.find("count == 1").unwrap();
        assert!(guard < set_expiry);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let err = RedisCounterStore::connect("redis://127.0.0.1:1/").await.unwrap_err();
        assert!(matches!(err, StoreError::Connection(_)));
    }

    /// Runs against a live server when `REDIS_URL` is set
    #[tokio::test]
    async fn test_increment_against_live_server() {
        let Ok(url) = std::env::var("REDIS_URL") else {
            return;
        };
        let store = RedisCounterStore::connect(&url).await.unwrap();
        let key = format!("rate_limit:test-{}:READ:0", uuid::Uuid::new_v4());

        let first = store.increment_with_ttl(&key, Duration::from_secs(60)).await.unwrap();
        let second = store.increment_with_ttl(&key, Duration::from_secs(60)).await.unwrap();
        assert_eq!((first, second), (1, 2));
    }
}
