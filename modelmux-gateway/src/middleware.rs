//! Correlation-id and access-log middleware. Every response carries an
//! `x-request-id` header (reusing the client's value when it sent one),
//! and every completed request emits one structured access-log event.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use uuid::Uuid;

pub async fn correlation_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(CorrelationId(request_id.clone()));

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let mut response = next.run(request).await;

    let latency_ms = started.elapsed().as_millis();
    tracing::info!(
        %method,
        path,
        status = response.status().as_u16(),
        latency_ms,
        request_id = %request_id,
        "request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Correlation id stashed in request extensions for handlers and logs.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);
