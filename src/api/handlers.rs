use axum::{extract::State, http::StatusCode, Json};
use uuid::Uuid;

use crate::api::responses::{
    ApiResponse, EchoResponse, HealthResponse, ProbeResponse, StatusLabel,
};
use crate::idempotency::StatsSnapshot;
use crate::observability::get_metrics;

use super::routes::AppState;

/// Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let health = state.health_checker.check_all().await;
    let engine = state.engine.stats().snapshot();
    get_metrics().set_duplicate_rate(engine.duplicate_rate());

    let response = HealthResponse {
        status: health.status.as_str().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
        health,
        engine,
    };

    Json(ApiResponse::success(response))
}

/// Readiness check endpoint.
pub async fn readiness_check(State(state): State<AppState>) -> ProbeResponse {
    let status = if state.health_checker.is_ready().await {
        StatusLabel::Ok
    } else {
        StatusLabel::Unavailable
    };
    ProbeResponse { status }
}

/// Liveness check endpoint.
pub async fn liveness_check(State(state): State<AppState>) -> ProbeResponse {
    let status = if state.health_checker.is_alive() {
        StatusLabel::Ok
    } else {
        StatusLabel::Unavailable
    };
    ProbeResponse { status }
}

/// Prometheus scrape endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> (StatusCode, String) {
    match state.metrics_handle {
        Some(ref handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Metrics recorder not installed".to_string(),
        ),
    }
}

/// Engine counters.
pub async fn engine_stats(State(state): State<AppState>) -> Json<ApiResponse<StatsSnapshot>> {
    Json(ApiResponse::success(state.engine.stats().snapshot()))
}

/// Demo mutating resource guarded by the idempotency middleware. Every
/// execution mints a new id, so a replay is observable by its unchanged id.
pub async fn create_echo(
    Json(payload): Json<serde_json::Value>,
) -> (StatusCode, Json<ApiResponse<EchoResponse>>) {
    let response = EchoResponse {
        id: Uuid::new_v4(),
        received: payload,
        created_at: chrono::Utc::now(),
    };
    tracing::info!(id = %response.id, "Echo resource created");

    (StatusCode::CREATED, Json(ApiResponse::success(response)))
}
