use crate::store::CacheStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const STORE_TIMEOUT: Duration = Duration::from_secs(5);
const STORE_LATENCY_THRESHOLD_MS: f64 = 50.0;

/// Health status of a service or dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, HealthStatus::Degraded)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy)
    }
}

/// Health status of a single dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub name: String,
    pub status: HealthStatus,
    pub latency_ms: Option<f64>,
    pub message: Option<String>,
}

impl DependencyHealth {
    pub fn healthy(name: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            latency_ms: Some(latency_ms),
            message: None,
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            latency_ms: None,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            message: Some(message.into()),
        }
    }
}

/// Aggregated health check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedHealth {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: Vec<DependencyHealth>,
}

impl AggregatedHealth {
    pub fn new(version: String, uptime_seconds: u64, dependencies: Vec<DependencyHealth>) -> Self {
        let status = Self::aggregate_status(&dependencies);
        Self {
            status,
            version,
            uptime_seconds,
            dependencies,
        }
    }

    fn aggregate_status(dependencies: &[DependencyHealth]) -> HealthStatus {
        let has_unhealthy = dependencies.iter().any(|d| d.status.is_unhealthy());
        let has_degraded = dependencies.iter().any(|d| d.status.is_degraded());

        if has_unhealthy {
            HealthStatus::Unhealthy
        } else if has_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Health checker for the cache store and the durable sink.
pub struct HealthChecker {
    cache: Arc<dyn CacheStore>,
    sink_name: &'static str,
    sink_connected: bool,
    start_time: std::time::Instant,
}

impl HealthChecker {
    pub fn new(cache: Arc<dyn CacheStore>, sink_name: &'static str, sink_connected: bool) -> Self {
        Self {
            cache,
            sink_name,
            sink_connected,
            start_time: std::time::Instant::now(),
        }
    }

    pub async fn check_all(&self) -> AggregatedHealth {
        let dependencies = vec![self.check_store().await, self.check_sink()];

        AggregatedHealth::new(
            env!("CARGO_PKG_VERSION").to_string(),
            self.start_time.elapsed().as_secs(),
            dependencies,
        )
    }

    /// Pings the cache store. Slow answers degrade, failures are unhealthy.
    pub async fn check_store(&self) -> DependencyHealth {
        let start = std::time::Instant::now();

        match tokio::time::timeout(STORE_TIMEOUT, self.cache.ping()).await {
            Ok(Ok(())) => {
                let latency = start.elapsed().as_secs_f64() * 1000.0;
                if latency > STORE_LATENCY_THRESHOLD_MS {
                    DependencyHealth {
                        name: "cache_store".to_string(),
                        status: HealthStatus::Degraded,
                        latency_ms: Some(latency),
                        message: Some("High latency detected".to_string()),
                    }
                } else {
                    DependencyHealth::healthy("cache_store", latency)
                }
            }
            Ok(Err(e)) => DependencyHealth::unhealthy("cache_store", format!("PING failed: {}", e)),
            Err(_) => DependencyHealth::unhealthy("cache_store", "PING timeout"),
        }
    }

    /// Sink delivery is best effort, so a disconnected sink only degrades.
    pub fn check_sink(&self) -> DependencyHealth {
        let name = format!("sink:{}", self.sink_name);
        if self.sink_connected {
            DependencyHealth::healthy(name, 0.0)
        } else {
            DependencyHealth::degraded(name, "Sink not connected")
        }
    }

    pub fn is_alive(&self) -> bool {
        true
    }

    /// Ready when the store answers. The engine fails closed without it.
    pub async fn is_ready(&self) -> bool {
        !self.check_store().await.status.is_unhealthy()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
