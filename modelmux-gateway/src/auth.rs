//! # Authentication
//!
//! Bearer-token authentication for the OpenAI-compatible surface. A token
//! is either an opaque API key from the configured key table or an HS256
//! JWT; both resolve to a [`Principal`] carrying the tenant/user scope the
//! router and deduplicator key on. Identity management itself lives
//! outside the gateway; this layer only consumes its artifacts.

use crate::config::AuthConfig;
use crate::gateway_error::GatewayError;
use crate::request_context::Principal;
use crate::server::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

/// Claims accepted in bearer JWTs. `sub` is the principal id; tenant and
/// user scoping are optional claims.
#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[allow(dead_code)]
    exp: u64,
}

/// Token verification against the configured key table and JWT secret.
#[derive(Debug, Clone)]
pub struct AuthService {
    config: AuthConfig,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Resolve a bearer token to a principal.
    ///
    /// API keys are checked first; anything that is not a configured key is
    /// treated as a JWT.
    pub fn authenticate(&self, token: &str) -> Result<Principal, GatewayError> {
        if let Some(entry) = self
            .config
            .api_keys
            .iter()
            .find(|k| k.enabled && k.key == token)
        {
            return Ok(Principal {
                principal_id: entry.name.clone(),
                tenant_id: entry.tenant_id.clone(),
                user_id: entry.user_id.clone(),
            });
        }

        let Some(secret) = &self.config.jwt_secret else {
            return Err(GatewayError::Auth {
                message: "invalid API key".to_string(),
            });
        };

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| GatewayError::Auth {
            message: format!("invalid bearer token: {e}"),
        })?;

        Ok(Principal {
            principal_id: token_data.claims.sub,
            tenant_id: token_data.claims.tenant_id,
            user_id: token_data.claims.user_id,
        })
    }
}

/// Extract the bearer token from an `Authorization` header value.
fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Axum middleware resolving the caller and stashing the [`Principal`] in
/// request extensions. The health endpoint stays open.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let principal = if state.auth.enabled() {
        let header = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| GatewayError::Auth {
                message: "missing Authorization header".to_string(),
            })?;
        let token = bearer_token(header).ok_or_else(|| GatewayError::Auth {
            message: "malformed Authorization header, expected Bearer token".to_string(),
        })?;
        state.auth.authenticate(token)?
    } else {
        Principal {
            principal_id: "anonymous".to_string(),
            tenant_id: None,
            user_id: None,
        }
    };

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiKeyEntry;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        tenant_id: Option<String>,
        user_id: Option<String>,
        exp: u64,
    }

    fn service() -> AuthService {
        AuthService::new(AuthConfig {
            enabled: true,
            jwt_secret: Some("test-secret".to_string()),
            api_keys: vec![
                ApiKeyEntry {
                    key: "mk-valid".to_string(),
                    name: "ci".to_string(),
                    enabled: true,
                    tenant_id: Some("acme".to_string()),
                    user_id: None,
                },
                ApiKeyEntry {
                    key: "mk-disabled".to_string(),
                    name: "old".to_string(),
                    enabled: false,
                    tenant_id: None,
                    user_id: None,
                },
            ],
        })
    }

    #[test]
    fn api_key_resolves_to_its_principal() {
        let principal = service().authenticate("mk-valid").unwrap();
        assert_eq!(principal.principal_id, "ci");
        assert_eq!(principal.tenant_id.as_deref(), Some("acme"));
    }

    #[test]
    fn disabled_key_is_rejected() {
        assert!(service().authenticate("mk-disabled").is_err());
    }

    #[test]
    fn hs256_jwt_resolves_to_its_claims() {
        let exp = (chrono::Utc::now().timestamp() + 3600) as u64;
        let token = encode(
            &Header::default(),
            &TestClaims {
                sub: "user-7".to_string(),
                tenant_id: Some("acme".to_string()),
                user_id: Some("u7".to_string()),
                exp,
            },
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        let principal = service().authenticate(&token).unwrap();
        assert_eq!(principal.principal_id, "user-7");
        assert_eq!(principal.user_id.as_deref(), Some("u7"));
    }

    #[test]
    fn garbage_token_is_rejected() {
        assert!(service().authenticate("not-a-key-not-a-jwt").is_err());
    }

    #[test]
    fn bearer_prefix_parsing() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }
}
