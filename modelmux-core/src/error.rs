//! # Error Taxonomy
//!
//! This module defines the closed error taxonomy shared by every layer of the
//! routing engine. Upstream provider failures of any shape are normalized
//! into [`ErrorKind`] before they reach the router or the orchestrator, so
//! fallback decisions branch on a small, stable set of kinds instead of
//! provider-specific status codes.
//!
//! ## Overview
//!
//! - **ErrorKind**: the closed enumeration every adapter must map into
//! - **AdapterError**: an error kind plus human-readable detail, produced by
//!   provider adapters and consumed by the fallback orchestrator
//! - **Conversions**: `reqwest` and `serde_json` failures convert into the
//!   transient/invalid-response kinds automatically
//!
//! ## Fallback semantics
//!
//! The orchestrator treats kinds in three groups:
//!
//! - `RateLimited`, `QuotaExhausted`, `Transient`, `UpstreamUnavailable`:
//!   provider-side, retry the next candidate
//! - `InvalidRequest`, `AuthFailed`, `NotFound`, `ContextLengthExceeded`:
//!   client-side, terminal, no failure attribution
//! - `Canceled`: stop immediately without touching health state

use thiserror::Error;

/// Closed error classification for every failure the engine can surface.
///
/// Adapters are responsible for mapping provider wire errors into exactly one
/// of these kinds; nothing outside this enum crosses the adapter boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or unsupported request (client-side, terminal)
    InvalidRequest,
    /// Credential rejected by the upstream or the gateway
    AuthFailed,
    /// Model or resource does not exist
    NotFound,
    /// Upstream returned 429 or equivalent
    RateLimited,
    /// Upstream account/billing quota exhausted
    QuotaExhausted,
    /// Prompt exceeds the model's context window
    ContextLengthExceeded,
    /// Transient upstream fault (5xx, connect reset, decode failure)
    Transient,
    /// Upstream unreachable, or every candidate failed
    UpstreamUnavailable,
    /// Request context canceled or deadline elapsed
    Canceled,
    /// Unclassified internal fault
    InternalError,
}

impl ErrorKind {
    /// Whether the orchestrator may try the next candidate after this kind.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited
                | ErrorKind::QuotaExhausted
                | ErrorKind::Transient
                | ErrorKind::UpstreamUnavailable
        )
    }

    /// Client-side faults never mark the provider unhealthy.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidRequest
                | ErrorKind::AuthFailed
                | ErrorKind::NotFound
                | ErrorKind::ContextLengthExceeded
        )
    }

    /// Stable machine-readable code used in error envelopes and logs.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::AuthFailed => "auth_failed",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::QuotaExhausted => "quota_exhausted",
            ErrorKind::ContextLengthExceeded => "context_length_exceeded",
            ErrorKind::Transient => "transient",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::Canceled => "canceled",
            ErrorKind::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Error produced by a provider adapter invocation.
///
/// Carries the normalized [`ErrorKind`] plus whatever detail the upstream
/// offered. The detail is for operator logs; the kind drives control flow.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct AdapterError {
    /// Normalized classification
    pub kind: ErrorKind,
    /// Human-readable detail, never shown to end clients verbatim
    pub message: String,
}

impl AdapterError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Map an upstream HTTP status into the closed taxonomy.
    ///
    /// Providers that signal quota exhaustion with a distinct status or body
    /// should classify before falling back to this mapping.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            400 => ErrorKind::InvalidRequest,
            401 | 403 => ErrorKind::AuthFailed,
            404 => ErrorKind::NotFound,
            402 => ErrorKind::QuotaExhausted,
            413 => ErrorKind::ContextLengthExceeded,
            429 => ErrorKind::RateLimited,
            500..=599 => ErrorKind::Transient,
            _ => ErrorKind::Transient,
        };
        Self::new(kind, message)
    }

    pub fn canceled() -> Self {
        Self::new(ErrorKind::Canceled, "request canceled")
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Transient
        } else if err.is_connect() {
            ErrorKind::UpstreamUnavailable
        } else if let Some(status) = err.status() {
            return AdapterError::from_status(status.as_u16(), err.to_string());
        } else {
            ErrorKind::Transient
        };
        AdapterError::new(kind, err.to_string())
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        AdapterError::new(ErrorKind::Transient, format!("response decode: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_covers_the_taxonomy() {
        assert_eq!(
            AdapterError::from_status(429, "slow down").kind,
            ErrorKind::RateLimited
        );
        assert_eq!(
            AdapterError::from_status(401, "bad key").kind,
            ErrorKind::AuthFailed
        );
        assert_eq!(
            AdapterError::from_status(503, "overloaded").kind,
            ErrorKind::Transient
        );
        assert_eq!(
            AdapterError::from_status(402, "billing").kind,
            ErrorKind::QuotaExhausted
        );
    }

    #[test]
    fn client_faults_are_not_retryable() {
        for kind in [
            ErrorKind::InvalidRequest,
            ErrorKind::AuthFailed,
            ErrorKind::NotFound,
            ErrorKind::ContextLengthExceeded,
        ] {
            assert!(kind.is_client_fault());
            assert!(!kind.is_retryable());
        }
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(!ErrorKind::Canceled.is_retryable());
        assert!(!ErrorKind::Canceled.is_client_fault());
    }
}
