use serde::Deserialize;
use std::time::Duration;
use validator::Validate;

use crate::error::{AppError, Result};
use crate::idempotency::EngineConfig;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Settings {
    #[serde(default)]
    #[validate]
    pub store: StoreSettings,
    #[validate]
    pub redis: RedisSettings,
    #[validate]
    pub idempotency: IdempotencySettings,
    #[validate]
    pub sink: SinkSettings,
    pub application: ApplicationSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

/// Selects the cache store. The in-memory backend is single-process only
/// and is swept for expired entries every `sweep_interval_secs`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StoreSettings {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,
    #[serde(default = "default_sweep_interval_secs")]
    #[validate(range(min = 1))]
    pub sweep_interval_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RedisSettings {
    #[validate(length(min = 1))]
    pub url: String,
    #[serde(default = "default_key_prefix")]
    #[validate(length(min = 1))]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct IdempotencySettings {
    #[validate(range(min = 1))]
    pub lock_lease_ms: u64,
    #[validate(range(min = 1))]
    pub record_ttl_secs: u64,
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    #[serde(default = "default_header_name")]
    #[validate(length(min = 1))]
    pub header_name: String,
    #[serde(default = "default_max_key_length")]
    #[validate(range(min = 1, max = 1024))]
    pub max_key_length: usize,
    #[serde(default = "default_max_capture_bytes")]
    #[validate(range(min = 1))]
    pub max_capture_bytes: usize,
    #[serde(default = "default_max_request_body_bytes")]
    #[validate(range(min = 1))]
    pub max_request_body_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Log,
    Kafka,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SinkSettings {
    pub kind: SinkKind,
    #[serde(default)]
    pub brokers: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Redis
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_key_prefix() -> String {
    "idem".to_string()
}

fn default_methods() -> Vec<String> {
    ["POST", "PUT", "PATCH", "DELETE"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_header_name() -> String {
    crate::idempotency::IDEMPOTENCY_KEY_HEADER.to_string()
}

fn default_max_key_length() -> usize {
    255
}

fn default_max_capture_bytes() -> usize {
    1024 * 1024
}

fn default_max_request_body_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_topic() -> String {
    "idempotency.completed".to_string()
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Parses a guarded method name. Extension methods are rejected.
fn parse_method(name: &str) -> Result<http::Method> {
    use http::Method;

    match name.trim().to_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "HEAD" => Ok(Method::HEAD),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        "OPTIONS" => Ok(Method::OPTIONS),
        "TRACE" => Ok(Method::TRACE),
        "CONNECT" => Ok(Method::CONNECT),
        _ => Err(AppError::Validation(format!("Unknown HTTP method: {}", name))),
    }
}

impl Settings {
    pub fn new() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        Ok(settings)
    }

    /// Builds the engine configuration, rejecting unknown methods and a
    /// record TTL shorter than the lock lease.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let idem = &self.idempotency;
        let methods = idem
            .methods
            .iter()
            .map(String::as_str)
            .map(parse_method)
            .collect::<Result<Vec<_>>>()?;

        let config = EngineConfig {
            key_prefix: self.redis.key_prefix.clone(),
            lock_lease: Duration::from_millis(idem.lock_lease_ms),
            record_ttl: Duration::from_secs(idem.record_ttl_secs),
            methods: methods.into_iter().collect(),
            header_name: idem.header_name.to_lowercase(),
            max_key_length: idem.max_key_length,
            max_capture_bytes: idem.max_capture_bytes,
        };
        config.validate()?;
        Ok(config)
    }
}
