use crate::error::Result;
use crate::observability::{get_metrics, LatencyTimer};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Script;
use std::collections::HashMap;
use std::time::Duration;

use super::cache_store::CacheStore;

const CREATE_FIELDS_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV, 2))
redis.call('PEXPIRE', KEYS[1], ARGV[1])
return 1
"#;

const UPDATE_FIELDS_IF_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], ARGV[1]) ~= ARGV[2] then
    return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV, 3))
return 1
"#;

const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Redis-backed cache store. Records are hashes, locks are `SET NX PX`
/// values, compound operations run as Lua scripts.
#[derive(Clone)]
pub struct RedisCacheStore {
    conn: MultiplexedConnection,
    create_fields: Script,
    update_fields_if: Script,
    release_lock: Script,
}

impl RedisCacheStore {
    pub async fn connect(client: &redis::Client) -> Result<Self> {
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self::with_connection(conn))
    }

    pub fn with_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            create_fields: Script::new(CREATE_FIELDS_SCRIPT),
            update_fields_if: Script::new(UPDATE_FIELDS_IF_SCRIPT),
            release_lock: Script::new(RELEASE_LOCK_SCRIPT),
        }
    }

    fn observe<T>(operation: &str, timer: LatencyTimer, result: &redis::RedisResult<T>) {
        get_metrics().record_store_operation(operation, timer.elapsed_ms(), result.is_ok());
        if let Err(e) = result {
            tracing::warn!(operation, "Redis operation failed: {}", e);
        }
    }
}

fn flatten(fields: Vec<(String, String)>) -> Vec<String> {
    fields.into_iter().flat_map(|(k, v)| [k, v]).collect()
}

fn millis(duration: Duration) -> u64 {
    (duration.as_millis() as u64).max(1)
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let timer = LatencyTimer::new();
        let result = redis::cmd("EXISTS")
            .arg(key)
            .query_async::<_, bool>(&mut conn)
            .await;
        Self::observe("exists", timer, &result);
        Ok(result?)
    }

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let timer = LatencyTimer::new();
        let result = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async::<_, Option<String>>(&mut conn)
            .await;
        Self::observe("get_field", timer, &result);
        Ok(result?)
    }

    async fn get_fields(&self, key: &str) -> Result<Option<HashMap<String, String>>> {
        let mut conn = self.conn.clone();
        let timer = LatencyTimer::new();
        let result = redis::cmd("HGETALL")
            .arg(key)
            .query_async::<_, HashMap<String, String>>(&mut conn)
            .await;
        Self::observe("get_fields", timer, &result);
        let fields = result?;
        Ok(if fields.is_empty() { None } else { Some(fields) })
    }

    async fn set_fields(&self, key: &str, fields: Vec<(String, String)>) -> Result<()> {
        let mut conn = self.conn.clone();
        let timer = LatencyTimer::new();
        let result = redis::cmd("HSET")
            .arg(key)
            .arg(flatten(fields))
            .query_async::<_, ()>(&mut conn)
            .await;
        Self::observe("set_fields", timer, &result);
        Ok(result?)
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let timer = LatencyTimer::new();
        let result = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async::<_, bool>(&mut conn)
            .await;
        Self::observe("set_expiry", timer, &result);
        Ok(result?)
    }

    async fn time_to_live(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn.clone();
        let timer = LatencyTimer::new();
        let result = redis::cmd("PTTL")
            .arg(key)
            .query_async::<_, i64>(&mut conn)
            .await;
        Self::observe("time_to_live", timer, &result);
        // -2: no such key, -1: no expiry.
        let ms = result?;
        Ok((ms >= 0).then(|| Duration::from_millis(ms as u64)))
    }

    async fn create_fields(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let timer = LatencyTimer::new();
        let result = self
            .create_fields
            .key(key)
            .arg(millis(ttl))
            .arg(flatten(fields))
            .invoke_async::<_, i64>(&mut conn)
            .await;
        Self::observe("create_fields", timer, &result);
        Ok(result? == 1)
    }

    async fn update_fields_if(
        &self,
        key: &str,
        guard_field: &str,
        expected: &str,
        fields: Vec<(String, String)>,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let timer = LatencyTimer::new();
        let result = self
            .update_fields_if
            .key(key)
            .arg(guard_field)
            .arg(expected)
            .arg(flatten(fields))
            .invoke_async::<_, i64>(&mut conn)
            .await;
        Self::observe("update_fields_if", timer, &result);
        Ok(result? == 1)
    }

    async fn try_acquire_lock(&self, key: &str, token: &str, lease: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let timer = LatencyTimer::new();
        let result = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(millis(lease))
            .query_async::<_, Option<String>>(&mut conn)
            .await;
        Self::observe("try_acquire_lock", timer, &result);
        Ok(result?.is_some())
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let timer = LatencyTimer::new();
        let result = self
            .release_lock
            .key(key)
            .arg(token)
            .invoke_async::<_, i64>(&mut conn)
            .await;
        Self::observe("release_lock", timer, &result);
        Ok(result? == 1)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
