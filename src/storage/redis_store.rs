use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::time::Duration;

use super::KvStore;
use crate::error::ProviderResult;

// Nil when the hash is gone, so an increment never recreates a partial hash.
const ADJUST_COUNT_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return false
end
local count = redis.call('HINCRBY', KEYS[1], ARGV[1], ARGV[2])
if count <= 0 then
  redis.call('HDEL', KEYS[1], ARGV[1])
end
return count
";

/// [`KvStore`] over a shared, auto-reconnecting Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    adjust_count: Script,
}

impl RedisStore {
    pub async fn connect(url: &str) -> ProviderResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("Connected to redis at {}", url);
        Ok(Self {
            conn,
            adjust_count: Script::new(ADJUST_COUNT_SCRIPT),
        })
    }
}

fn ttl_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1)
}

#[async_trait]
impl KvStore for RedisStore {
    async fn exists(&self, key: &str) -> ProviderResult<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn hget(&self, key: &str, field: &str) -> ProviderResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.hget(key, field).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> ProviderResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> ProviderResult<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        Ok(conn.hgetall(key).await?)
    }

    async fn del(&self, key: &str) -> ProviderResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn hset_all(&self, key: &str, entries: &[(String, String)], ttl: Option<Duration>) -> ProviderResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().hset_multiple(key, entries).ignore();
        if let Some(ttl) = ttl {
            pipe.expire(key, ttl_secs(ttl)).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn adjust_count(&self, key: &str, field: &str, delta: i64) -> ProviderResult<Option<i64>> {
        let mut conn = self.conn.clone();
        let count: Option<i64> = self
            .adjust_count
            .key(key)
            .arg(field)
            .arg(delta)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }
}
