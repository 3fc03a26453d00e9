//! # Gateway Error Types
//!
//! The gateway-level error enum and its mapping onto the OpenAI error
//! envelope `{"error": {"message", "type", "param?", "code?"}}`. Routing
//! failures carry their per-attempt history for the logs; the envelope
//! itself never names upstream providers or internal detail. The
//! correlation id travels on the `x-request-id` response header, attached
//! by middleware to every response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use modelmux_core::error::ErrorKind;
use modelmux_core::orchestrator::RouteError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Routing/fallback failure from the orchestrator
    #[error("routing failed: {0}")]
    Route(RouteError),

    /// Gateway authentication failure
    #[error("authentication error: {message}")]
    Auth { message: String },

    /// Invalid or malformed request
    #[error("invalid request: {message}")]
    InvalidRequest {
        message: String,
        param: Option<String>,
    },

    /// Request or model not found
    #[error("not found: {message}")]
    NotFound { message: String, code: &'static str },

    /// JSON serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unclassified internal fault
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            param: None,
        }
    }

    pub fn invalid_body(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            param: Some("body".to_string()),
        }
    }

    pub fn model_not_found(model: &str) -> Self {
        Self::NotFound {
            message: format!("model '{model}' does not exist or you do not have access to it"),
            code: "model_not_found",
        }
    }
}

impl From<RouteError> for GatewayError {
    fn from(error: RouteError) -> Self {
        GatewayError::Route(error)
    }
}

/// Envelope pieces for one error: status, message, type, code.
fn envelope_for(error: &GatewayError) -> (StatusCode, String, &'static str, Option<String>) {
    match error {
        GatewayError::Route(route_error) => {
            let (status, error_type, message): (StatusCode, &'static str, String) =
                match route_error.kind {
                    ErrorKind::InvalidRequest => (
                        StatusCode::BAD_REQUEST,
                        "invalid_request_error",
                        route_error.message.clone(),
                    ),
                    ErrorKind::ContextLengthExceeded => (
                        StatusCode::BAD_REQUEST,
                        "invalid_request_error",
                        route_error.message.clone(),
                    ),
                    ErrorKind::NotFound => (
                        StatusCode::NOT_FOUND,
                        "invalid_request_error",
                        route_error.message.clone(),
                    ),
                    ErrorKind::AuthFailed => (
                        StatusCode::UNAUTHORIZED,
                        "authentication_error",
                        route_error.message.clone(),
                    ),
                    ErrorKind::RateLimited | ErrorKind::QuotaExhausted => (
                        StatusCode::TOO_MANY_REQUESTS,
                        "rate_limit_error",
                        "upstream capacity exhausted, retry later".to_string(),
                    ),
                    ErrorKind::Canceled => (
                        // Nginx convention for client-closed requests
                        StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
                        "request_canceled",
                        "request was canceled".to_string(),
                    ),
                    ErrorKind::Transient | ErrorKind::UpstreamUnavailable => (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "server_error",
                        "no upstream provider is currently available".to_string(),
                    ),
                    ErrorKind::InternalError => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "server_error",
                        "internal error".to_string(),
                    ),
                };
            let code = match route_error.kind {
                ErrorKind::NotFound => Some("model_not_found".to_string()),
                ErrorKind::ContextLengthExceeded => Some("context_length_exceeded".to_string()),
                _ => None,
            };
            (status, message, error_type, code)
        }
        GatewayError::Auth { message } => (
            StatusCode::UNAUTHORIZED,
            message.clone(),
            "authentication_error",
            None,
        ),
        GatewayError::InvalidRequest { message, .. } => (
            StatusCode::BAD_REQUEST,
            message.clone(),
            "invalid_request_error",
            None,
        ),
        GatewayError::NotFound { message, code } => (
            StatusCode::NOT_FOUND,
            message.clone(),
            "invalid_request_error",
            Some((*code).to_string()),
        ),
        GatewayError::Serialization(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("serialization error: {e}"),
            "server_error",
            None,
        ),
        GatewayError::Internal { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal error".to_string(),
            "server_error",
            None,
        ),
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if let GatewayError::Route(route_error) = &self {
            // Per-attempt detail is for operators, not the envelope
            for attempt in &route_error.attempts {
                tracing::warn!(
                    provider = %attempt.provider_key,
                    kind = %attempt.kind,
                    message = %attempt.message,
                    "failed candidate attempt"
                );
            }
        }

        let (status, message, error_type, code) = envelope_for(&self);
        let param = match &self {
            GatewayError::InvalidRequest { param, .. } => param.clone(),
            _ => None,
        };

        let mut error_body = json!({
            "message": message,
            "type": error_type,
        });
        if let Some(param) = param {
            error_body["param"] = json!(param);
        }
        if let Some(code) = code {
            error_body["code"] = json!(code);
        }

        (status, Json(json!({ "error": error_body }))).into_response()
    }
}
