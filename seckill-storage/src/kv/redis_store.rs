//! Redis-backed KV store on a deadpool connection pool.

use super::KvStore;
use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use redis::{AsyncCommands, ErrorKind, RedisError, Script};
use seckill_core::{SeckillResult, StoreError, StoreSettings};
use std::future::Future;
use std::time::Duration;

const BACKEND: &str = "redis";

/// Deletes KEYS[1] only when its value equals ARGV[1].
const COMPARE_AND_DELETE_LUA: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// [`KvStore`] over a shared Redis deployment.
///
/// Every call, including checking a connection out of the pool, is bounded
/// by `op_timeout`; an elapsed timeout surfaces as [`StoreError::Timeout`].
#[derive(Clone)]
pub struct RedisKvStore {
    pool: Pool,
    op_timeout: Duration,
    compare_and_delete_script: Script,
}

impl RedisKvStore {
    pub fn new(pool: Pool, op_timeout: Duration) -> Self {
        Self {
            pool,
            op_timeout,
            compare_and_delete_script: Script::new(COMPARE_AND_DELETE_LUA),
        }
    }

    /// Build a pool from settings. Does not connect; use `ping()` to verify.
    pub fn from_settings(settings: &StoreSettings) -> SeckillResult<Self> {
        let mut config = Config::from_url(&settings.redis_url);
        let mut pool_config = PoolConfig::new(settings.pool_size);
        pool_config.timeouts.wait = Some(settings.op_timeout);
        pool_config.timeouts.create = Some(settings.op_timeout);
        pool_config.timeouts.recycle = Some(settings.op_timeout);
        config.pool = Some(pool_config);

        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::unavailable(BACKEND, e.to_string()))?;

        tracing::info!(url = %settings.redis_url, pool_size = settings.pool_size, "Redis pool created");
        Ok(Self::new(pool, settings.op_timeout))
    }

    async fn connection(&self) -> SeckillResult<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::unavailable(BACKEND, e.to_string()).into())
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> SeckillResult<T>
    where
        F: Future<Output = SeckillResult<T>> + Send,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation, after = ?self.op_timeout, "Redis call timed out");
                Err(StoreError::timeout(BACKEND, operation, self.op_timeout).into())
            }
        }
    }
}

fn map_redis_error(key: &str, e: RedisError) -> StoreError {
    if e.kind() == ErrorKind::TypeError || e.code() == Some("WRONGTYPE") {
        StoreError::WrongType {
            key: key.to_string(),
            reason: e.to_string(),
        }
    } else {
        StoreError::unavailable(BACKEND, e.to_string())
    }
}

fn as_millis(ttl: Duration) -> u64 {
    // PX rejects 0; anything below a millisecond rounds up.
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl KvStore for RedisKvStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn get(&self, key: &str) -> SeckillResult<Option<String>> {
        self.bounded("GET", async {
            let mut conn = self.connection().await?;
            let value: Option<String> = conn.get(key).await.map_err(|e| map_redis_error(key, e))?;
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> SeckillResult<()> {
        self.bounded("SET", async {
            let mut conn = self.connection().await?;
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(as_millis(ttl));
            }
            let _: () = cmd
                .query_async(&mut conn)
                .await
                .map_err(|e| map_redis_error(key, e))?;
            Ok(())
        })
        .await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> SeckillResult<bool> {
        self.bounded("SET NX", async {
            let mut conn = self.connection().await?;
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("PX")
                .arg(as_millis(ttl))
                .query_async(&mut conn)
                .await
                .map_err(|e| map_redis_error(key, e))?;
            Ok(reply.is_some())
        })
        .await
    }

    async fn increment(&self, key: &str) -> SeckillResult<i64> {
        self.bounded("INCR", async {
            let mut conn = self.connection().await?;
            let value: i64 = conn
                .incr(key, 1i64)
                .await
                .map_err(|e| map_redis_error(key, e))?;
            Ok(value)
        })
        .await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> SeckillResult<bool> {
        self.bounded("EVALSHA compare_and_delete", async {
            let mut conn = self.connection().await?;
            let deleted: i64 = self
                .compare_and_delete_script
                .key(key)
                .arg(expected)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| map_redis_error(key, e))?;
            Ok(deleted == 1)
        })
        .await
    }

    async fn delete(&self, key: &str) -> SeckillResult<bool> {
        self.bounded("DEL", async {
            let mut conn = self.connection().await?;
            let deleted: i64 = conn.del(key).await.map_err(|e| map_redis_error(key, e))?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn ping(&self) -> SeckillResult<()> {
        self.bounded("PING", async {
            let mut conn = self.connection().await?;
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(|e| StoreError::unavailable(BACKEND, e.to_string()))?;
            Ok(())
        })
        .await
    }
}

#[cfg(all(test, feature = "redis-tests"))]
mod tests {
    use super::*;
    use seckill_core::LeaseToken;

    fn store() -> RedisKvStore {
        let mut settings = StoreSettings::from_env();
        settings.op_timeout = Duration::from_secs(2);
        RedisKvStore::from_settings(&settings).unwrap()
    }

    fn unique_key(prefix: &str) -> String {
        format!("seckill-test:{}:{}", prefix, LeaseToken::generate())
    }

    #[tokio::test]
    async fn test_redis_ping() {
        store().ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_redis_set_if_absent_and_compare_and_delete() {
        let store = store();
        let key = unique_key("lock");

        assert!(store
            .set_if_absent(&key, "a", Duration::from_secs(5))
            .await
            .unwrap());
        assert!(!store
            .set_if_absent(&key, "b", Duration::from_secs(5))
            .await
            .unwrap());

        assert!(!store.compare_and_delete(&key, "b").await.unwrap());
        assert!(store.compare_and_delete(&key, "a").await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_redis_increment() {
        let store = store();
        let key = unique_key("icr");
        assert_eq!(store.increment(&key).await.unwrap(), 1);
        assert_eq!(store.increment(&key).await.unwrap(), 2);
        assert!(store.delete(&key).await.unwrap());
    }
}
