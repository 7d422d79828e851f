use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 digest binding an idempotency key to one logical operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hashes the operation type, resource identifier and payload body.
    pub fn compute(method: &http::Method, resource: &str, body: &[u8]) -> Self {
        let mut hasher = Sha256::new();

        hasher.update(b"op:");
        hasher.update(method.as_str().as_bytes());
        hasher.update(b"|res:");
        hasher.update(resource.as_bytes());
        hasher.update(b"|len:");
        hasher.update(body.len().to_string().as_bytes());
        hasher.update(b"|body:");
        hasher.update(body);

        Self(hex::encode(hasher.finalize()))
    }

    pub(crate) fn from_hex(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller-supplied idempotency key, validated and trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn parse(raw: &str, max_length: usize) -> Result<Self> {
        let key = raw.trim();

        if key.is_empty() {
            return Err(AppError::InvalidKey(
                "idempotency key cannot be empty".to_string(),
            ));
        }
        if key.len() > max_length {
            return Err(AppError::InvalidKey(format!(
                "idempotency key exceeds {} characters",
                max_length
            )));
        }
        if !key.chars().all(|c| c.is_ascii_graphic()) {
            return Err(AppError::InvalidKey(
                "idempotency key must contain only visible ASCII characters".to_string(),
            ));
        }

        Ok(Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
