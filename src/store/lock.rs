use crate::error::Result;
use crate::observability::get_metrics;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::cache_store::CacheStore;

/// Lease-based mutual exclusion over a [`CacheStore`]. Non-holders fail
/// immediately; there is no wait queue.
#[derive(Clone)]
pub struct LockManager {
    cache: Arc<dyn CacheStore>,
    key_prefix: String,
}

impl LockManager {
    pub fn new(cache: Arc<dyn CacheStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            cache,
            key_prefix: key_prefix.into(),
        }
    }

    fn make_key(&self, idempotency_key: &str) -> String {
        format!("{}:lock:{}", self.key_prefix, idempotency_key)
    }

    /// Atomically takes the lock for `key`. Returns `None` when another
    /// holder owns a live lease.
    pub async fn acquire(&self, key: &str, lease: Duration) -> Result<Option<LockGuard>> {
        let token = Uuid::new_v4().to_string();
        let acquired = self
            .cache
            .try_acquire_lock(&self.make_key(key), &token, lease)
            .await?;

        get_metrics().record_lock_acquisition(acquired);
        if !acquired {
            tracing::debug!("Idempotency lock contended");
            return Ok(None);
        }

        Ok(Some(LockGuard {
            manager: self.clone(),
            key: key.to_string(),
            token,
            released: false,
        }))
    }

    /// Releases the lock if `token` still owns it. Releasing an unheld,
    /// expired or foreign lock is a no-op.
    pub async fn release(&self, key: &str, token: &str) -> Result<()> {
        let released = self.cache.release_lock(&self.make_key(key), token).await?;
        if !released {
            tracing::debug!("Idempotency lock already expired or released");
        }
        Ok(())
    }
}

/// Ownership of one lease. Dropping the guard without calling
/// [`LockGuard::release`] schedules the release on the current runtime.
pub struct LockGuard {
    manager: LockManager,
    key: String,
    token: String,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        self.manager.release(&self.key, &self.token).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let manager = self.manager.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = manager.release(&key, &token).await {
                        tracing::warn!("Failed to release abandoned idempotency lock: {}", e);
                    }
                });
            }
            Err(_) => {
                tracing::warn!("No runtime to release abandoned idempotency lock; lease will expire");
            }
        }
    }
}
