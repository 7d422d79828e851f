use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use http::HeaderName;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use super::{
    handlers,
    middleware::{idempotency_middleware, track_http_metrics},
};
use crate::idempotency::IdempotencyEngine;
use crate::observability::HealthChecker;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<IdempotencyEngine>,
    pub health_checker: Arc<HealthChecker>,
    pub metrics_handle: Option<PrometheusHandle>,
    pub max_request_body_bytes: usize,
}

impl AppState {
    pub fn new(
        engine: Arc<IdempotencyEngine>,
        health_checker: Arc<HealthChecker>,
        max_request_body_bytes: usize,
    ) -> Self {
        Self {
            engine,
            health_checker,
            metrics_handle: None,
            max_request_body_bytes,
        }
    }

    /// Adds metrics handle to the state.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

/// Creates the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    let guarded = Router::new()
        .route("/v1/echo", post(handlers::create_echo))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            idempotency_middleware,
        ));

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check))
        // Metrics endpoints
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/v1/idempotency/stats", get(handlers::engine_stats))
        .merge(guarded)
        .layer(middleware::from_fn(track_http_metrics))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .with_state(state)
}
