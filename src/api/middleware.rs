use anyhow::{anyhow, bail};
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    http::{header::RETRY_AFTER, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::{BodyExt, LengthLimitError};
use std::sync::Mutex;

use super::routes::AppState;
use crate::error::AppError;
use crate::idempotency::{BufferedResponse, Handler, IdempotentRequest, ResponseSink};
use crate::observability::{get_metrics, LatencyTimer};

/// Records request count and latency per route template.
pub async fn track_http_metrics(request: Request, next: Next) -> Response {
    let timer = LatencyTimer::new();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    get_metrics().record_http_request(&method, &path, response.status().as_u16(), timer.elapsed_ms());
    response
}

/// Runs mutating requests through the idempotency engine.
///
/// The request body is buffered up to the configured limit so it can be
/// fingerprinted, then handed unchanged to the rest of the stack.
pub async fn idempotency_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let engine = state.engine.clone();
    if !engine.config().requires_idempotency(request.method()) {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.max_request_body_bytes).await {
        Ok(body) => body,
        Err(e) => return body_read_error(e, state.max_request_body_bytes).into_response(),
    };

    let idempotent_request = IdempotentRequest {
        method: parts.method.clone(),
        resource: parts.uri.path().to_string(),
        headers: parts.headers.clone(),
        body: body.clone(),
    };
    let downstream = Downstream::new(next, Request::from_parts(parts, Body::from(body)));
    let mut sink = BufferedResponse::new();

    match engine.handle(&idempotent_request, &downstream, &mut sink).await {
        Ok(_) => sink.into_response(),
        // The downstream answer was already forwarded; pass it through uncached.
        Err(AppError::HandlerFailure(_)) if sink.is_started() => sink.into_response(),
        Err(e) => {
            let retry = matches!(
                e,
                AppError::LockContended { .. } | AppError::AlreadyProcessing { .. }
            );
            let mut response = e.into_response();
            if retry {
                response.headers_mut().insert(
                    RETRY_AFTER,
                    HeaderValue::from(engine.config().retry_after_secs()),
                );
            }
            response
        }
    }
}

/// Separates an oversized body from a body that failed to arrive.
fn body_read_error(err: axum::Error, limit: usize) -> AppError {
    let inner = err.into_inner();
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(inner.as_ref());
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return AppError::PayloadTooLarge(format!("Request body exceeds {} bytes", limit));
        }
        source = e.source();
    }

    tracing::debug!("Failed to read request body: {}", inner);
    AppError::Validation(format!("Failed to read request body: {}", inner))
}

/// The remainder of the axum stack, invoked at most once.
struct Downstream {
    pending: Mutex<Option<(Next, Request)>>,
}

impl Downstream {
    fn new(next: Next, request: Request) -> Self {
        Self {
            pending: Mutex::new(Some((next, request))),
        }
    }
}

#[async_trait]
impl Handler for Downstream {
    async fn handle(
        &self,
        _request: &IdempotentRequest,
        sink: &mut dyn ResponseSink,
    ) -> anyhow::Result<()> {
        let pending = {
            let mut guard = self
                .pending
                .lock()
                .map_err(|_| anyhow!("downstream state poisoned"))?;
            guard.take()
        };
        let Some((next, request)) = pending else {
            bail!("downstream already invoked");
        };

        let (parts, mut body) = next.run(request).await.into_parts();
        sink.set_status(parts.status.as_u16());
        for (name, value) in parts.headers.iter() {
            match value.to_str() {
                Ok(value) => sink.set_header(name.as_str(), value),
                Err(_) => tracing::debug!(header = %name, "Dropped non-UTF-8 response header"),
            }
        }

        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(anyhow::Error::new)?;
            if let Ok(data) = frame.into_data() {
                sink.write(&data)?;
            }
        }

        if parts.status.is_server_error() {
            bail!("downstream answered {}", parts.status);
        }
        Ok(())
    }
}

impl IntoResponse for BufferedResponse {
    fn into_response(self) -> Response {
        let (status_code, headers, body) = self.into_parts();
        let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        for (name, value) in headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                response.headers_mut().append(name, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_response_into_response() {
        let mut buffered = BufferedResponse::new();
        buffered.set_status(201);
        buffered.set_header("content-type", "application/json");
        buffered.set_header("idempotency-replayed", "true");
        buffered.write(b"{}").unwrap();

        let response = buffered.into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
        assert_eq!(response.headers().get("idempotency-replayed").unwrap(), "true");
    }

    #[tokio::test]
    async fn test_oversized_body_is_payload_too_large() {
        let err = axum::body::to_bytes(Body::from("0123456789"), 4)
            .await
            .unwrap_err();
        let mapped = body_read_error(err, 4);
        assert!(matches!(mapped, AppError::PayloadTooLarge(_)));
        assert_eq!(mapped.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_body_transport_error_is_bad_request() {
        let err = axum::Error::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ));
        let mapped = body_read_error(err, 4);
        assert!(matches!(mapped, AppError::Validation(_)));
        assert_eq!(mapped.status_code(), StatusCode::BAD_REQUEST);
        assert!(mapped.to_string().contains("connection reset"));
    }

    #[test]
    fn test_buffered_response_defaults_to_ok() {
        let response = BufferedResponse::new().into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
