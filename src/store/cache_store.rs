use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Key-value store with per-key atomic operations and expiry.
///
/// Records are hashes of string fields; locks are plain values owned by a
/// token. Every method is atomic with respect to a single key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// All fields of a hash, or `None` when the key is absent or expired.
    async fn get_fields(&self, key: &str) -> Result<Option<HashMap<String, String>>>;

    async fn set_fields(&self, key: &str, fields: Vec<(String, String)>) -> Result<()>;

    /// Returns false if the key does not exist.
    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn time_to_live(&self, key: &str) -> Result<Option<Duration>>;

    /// Creates the hash with an expiry only if the key is absent.
    async fn create_fields(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<bool>;

    /// Writes `fields` only if `guard_field` currently equals `expected`.
    /// Leaves the expiry untouched.
    async fn update_fields_if(
        &self,
        key: &str,
        guard_field: &str,
        expected: &str,
        fields: Vec<(String, String)>,
    ) -> Result<bool>;

    /// Test-and-set: true iff no live lock existed and `token` now owns it.
    async fn try_acquire_lock(&self, key: &str, token: &str, lease: Duration) -> Result<bool>;

    /// Deletes the lock only if `token` still owns it. Returns whether a
    /// lock was removed; an absent or foreign lock is not an error.
    async fn release_lock(&self, key: &str, token: &str) -> Result<bool>;

    async fn ping(&self) -> Result<()>;
}
