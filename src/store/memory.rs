use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::cache_store::CacheStore;

#[derive(Debug, Clone)]
enum Value {
    Hash(HashMap<String, String>),
    Lock(String),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process cache store. Expiry follows the tokio clock, so paused-time
/// tests can step past leases and TTLs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCacheStore {
    data: Arc<RwLock<HashMap<String, Entry>>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every expired entry and returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut map = self.data.write().await;
        let before = map.len();
        map.retain(|_, entry| entry.is_live(now));
        before - map.len()
    }

    /// Number of entries, including expired ones not yet evicted.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    /// Reads a live entry under the shared lock. An expired entry found on
    /// the way is evicted under the write lock before returning.
    async fn read_live<T>(&self, key: &str, read: impl FnOnce(&Entry) -> T) -> Option<T> {
        let expired = {
            let map = self.data.read().await;
            match map.get(key) {
                Some(entry) if entry.is_live(Instant::now()) => return Some(read(entry)),
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            let mut map = self.data.write().await;
            evict_expired(&mut map, key);
        }
        None
    }
}

/// Removes `key` if its entry has expired.
fn evict_expired(map: &mut HashMap<String, Entry>, key: &str) {
    let now = Instant::now();
    if map.get(key).is_some_and(|e| !e.is_live(now)) {
        map.remove(key);
    }
}

fn live_mut<'a>(map: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    evict_expired(map, key);
    map.get_mut(key)
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read_live(key, |_| ()).await.is_some())
    }

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self
            .read_live(key, |e| match &e.value {
                Value::Hash(fields) => fields.get(field).cloned(),
                Value::Lock(_) => None,
            })
            .await
            .flatten())
    }

    async fn get_fields(&self, key: &str) -> Result<Option<HashMap<String, String>>> {
        Ok(self
            .read_live(key, |e| match &e.value {
                Value::Hash(fields) => Some(fields.clone()),
                Value::Lock(_) => None,
            })
            .await
            .flatten())
    }

    async fn set_fields(&self, key: &str, fields: Vec<(String, String)>) -> Result<()> {
        let mut map = self.data.write().await;
        match live_mut(&mut map, key) {
            Some(Entry {
                value: Value::Hash(existing),
                ..
            }) => existing.extend(fields),
            _ => {
                map.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Hash(fields.into_iter().collect()),
                        expires_at: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut map = self.data.write().await;
        Ok(match live_mut(&mut map, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        })
    }

    async fn time_to_live(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        Ok(self
            .read_live(key, |e| e.expires_at.map(|at| at.saturating_duration_since(now)))
            .await
            .flatten())
    }

    async fn create_fields(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<bool> {
        let mut map = self.data.write().await;
        if live_mut(&mut map, key).is_some() {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Hash(fields.into_iter().collect()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn update_fields_if(
        &self,
        key: &str,
        guard_field: &str,
        expected: &str,
        fields: Vec<(String, String)>,
    ) -> Result<bool> {
        let mut map = self.data.write().await;
        match live_mut(&mut map, key) {
            Some(Entry {
                value: Value::Hash(existing),
                ..
            }) if existing.get(guard_field).map(String::as_str) == Some(expected) => {
                existing.extend(fields);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn try_acquire_lock(&self, key: &str, token: &str, lease: Duration) -> Result<bool> {
        let mut map = self.data.write().await;
        if live_mut(&mut map, key).is_some() {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Lock(token.to_string()),
                expires_at: Some(Instant::now() + lease),
            },
        );
        Ok(true)
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<bool> {
        let mut map = self.data.write().await;
        let owned = matches!(
            live_mut(&mut map, key).map(|e| &e.value),
            Some(Value::Lock(holder)) if holder == token
        );
        if owned {
            map.remove(key);
        }
        Ok(owned)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Background task that periodically purges expired entries from an
/// [`InMemoryCacheStore`].
pub struct ExpirySweeper {
    store: InMemoryCacheStore,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(store: InMemoryCacheStore, interval: Duration) -> Self {
        Self { store, interval }
    }

    pub async fn run_once(&self) -> usize {
        self.store.purge_expired().await
    }

    /// Starts the sweeper in a background task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);

            loop {
                interval.tick().await;

                let count = self.store.purge_expired().await;
                if count > 0 {
                    tracing::debug!("Purged {} expired cache entries", count);
                }
            }
        })
    }
}
