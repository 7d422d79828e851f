use idempotency_engine::observability::{
    get_metrics, init_metrics, mask_sensitive, AggregatedHealth, DependencyHealth, HealthChecker,
    HealthStatus, LatencyTimer, LogConfig, LogFormat,
};
use idempotency_engine::store::InMemoryCacheStore;
use std::sync::Arc;

#[test]
fn test_log_config_default() {
    let config = LogConfig::default();
    assert_eq!(config.level, "info");
    assert_eq!(config.format, LogFormat::Pretty);
    assert!(config.include_target);
    assert!(!config.include_file);
    assert!(!config.include_line);
}

#[test]
fn test_log_config_from_settings_values() {
    let config = LogConfig::new("warn", "COMPACT");
    assert_eq!(config.level, "warn");
    assert_eq!(config.format, LogFormat::Compact);
}

#[test]
fn test_mask_sensitive_exact_boundary() {
    assert_eq!(mask_sensitive("1234", 2), "****");
}

#[test]
fn test_mask_sensitive_keeps_key_edges() {
    let masked = mask_sensitive("550e8400-e29b-41d4-a716-446655440000", 4);
    assert!(masked.starts_with("550e"));
    assert!(masked.ends_with("0000"));
    assert_eq!(masked.len(), 36);
    assert!(!masked.contains("e29b"));
}

#[test]
fn test_init_metrics_renders_engine_metrics() {
    let handle = init_metrics().unwrap();
    let metrics = get_metrics();

    metrics.record_request_outcome("executed");
    metrics.record_request_outcome("LOCK_CONTENDED");
    metrics.record_handler_latency(12.5, true);
    metrics.record_lock_acquisition(true);
    metrics.record_store_operation("hgetall", 0.8, true);
    metrics.record_sink_event("recorded");
    metrics.set_duplicate_rate(0.25);
    metrics.record_http_request("POST", "/v1/echo", 201, 3.0);

    let rendered = handle.render();
    assert!(rendered.contains("idempotency_requests_total"));
    assert!(rendered.contains("outcome=\"LOCK_CONTENDED\""));
    assert!(rendered.contains("idempotency_lock_acquisitions_total{result=\"acquired\"}"));
    assert!(rendered.contains("idempotency_sink_events_total{result=\"recorded\"}"));

    // A second call hands back the installed recorder.
    assert!(init_metrics().is_ok());
}

#[test]
fn test_latency_timer() {
    let timer = LatencyTimer::new();
    std::thread::sleep(std::time::Duration::from_millis(10));
    let elapsed = timer.elapsed_ms();
    assert!(elapsed >= 10.0);
    assert!(elapsed < 1000.0);
}

#[test]
fn test_dependency_health_constructors() {
    let healthy = DependencyHealth::healthy("cache_store", 5.0);
    assert_eq!(healthy.status, HealthStatus::Healthy);
    assert_eq!(healthy.latency_ms, Some(5.0));
    assert!(healthy.message.is_none());

    let degraded = DependencyHealth::degraded("sink:kafka", "Sink not connected");
    assert_eq!(degraded.status, HealthStatus::Degraded);
    assert!(degraded.latency_ms.is_none());

    let unhealthy = DependencyHealth::unhealthy("cache_store", "PING timeout");
    assert_eq!(unhealthy.status, HealthStatus::Unhealthy);
    assert_eq!(unhealthy.message.as_deref(), Some("PING timeout"));
}

#[test]
fn test_aggregated_health_worst_status_wins() {
    let health = AggregatedHealth::new(
        "1.0.0".to_string(),
        3600,
        vec![
            DependencyHealth::healthy("cache_store", 1.0),
            DependencyHealth::degraded("sink:kafka", "Slow"),
        ],
    );
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.uptime_seconds, 3600);

    let health = AggregatedHealth::new(
        "1.0.0".to_string(),
        0,
        vec![
            DependencyHealth::degraded("sink:kafka", "Slow"),
            DependencyHealth::unhealthy("cache_store", "Down"),
        ],
    );
    assert_eq!(health.status, HealthStatus::Unhealthy);

    let health = AggregatedHealth::new("1.0.0".to_string(), 0, vec![]);
    assert_eq!(health.status, HealthStatus::Healthy);
}

#[test]
fn test_health_serialization() {
    assert_eq!(serde_json::to_string(&HealthStatus::Degraded).unwrap(), "\"degraded\"");
    assert_eq!(HealthStatus::Unhealthy.as_str(), "unhealthy");

    let health = AggregatedHealth::new(
        "1.0.0".to_string(),
        100,
        vec![DependencyHealth::healthy("cache_store", 5.5)],
    );
    let json = serde_json::to_string(&health).unwrap();
    assert!(json.contains("\"status\":\"healthy\""));
    assert!(json.contains("\"name\":\"cache_store\""));
    assert!(json.contains("\"latency_ms\":5.5"));
    assert!(json.contains("\"uptime_seconds\":100"));
}

#[tokio::test]
async fn test_disconnected_sink_degrades_but_stays_ready() {
    let checker = HealthChecker::new(Arc::new(InMemoryCacheStore::new()), "kafka", false);

    let health = checker.check_all().await;
    assert_eq!(health.status, HealthStatus::Degraded);
    assert!(checker.is_ready().await);
    assert_eq!(checker.uptime_seconds(), 0);
}
