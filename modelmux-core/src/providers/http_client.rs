//! Shared reqwest wrapper for provider adapters: auth header strategies,
//! URL joining, error-status mapping, and a one-shot fallback-endpoint
//! retry when the primary endpoint is unreachable.

use crate::error::{AdapterError, ErrorKind};
use reqwest::{header::HeaderMap, Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// How the provider expects its credential.
#[derive(Clone, Debug)]
pub enum AuthStrategy {
    Bearer { token: String },
    Header { name: String, value: String },
    QueryParam { name: String, value: String },
    None,
}

/// HTTP client bound to one provider's endpoints and credential.
#[derive(Clone)]
pub struct HttpProviderClient {
    http: Client,
    base_url: String,
    fallback_url: Option<String>,
    default_headers: HeaderMap,
    query_auth: Option<(String, String)>,
}

impl HttpProviderClient {
    pub fn new(
        timeout: Duration,
        base_url: &str,
        fallback_url: Option<&str>,
        auth: AuthStrategy,
    ) -> Result<Self, AdapterError> {
        let http = Client::builder()
            .timeout(timeout)
            // Bound connection lifetime to avoid stale DNS on long-lived pools
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| {
                AdapterError::new(
                    ErrorKind::InternalError,
                    format!("failed to create HTTP client: {e}"),
                )
            })?;

        let mut default_headers = HeaderMap::new();
        let mut query_auth = None;
        match auth {
            AuthStrategy::Bearer { token } => {
                if let Ok(value) = format!("Bearer {token}").parse() {
                    default_headers.insert("Authorization", value);
                }
            }
            AuthStrategy::Header { name, value } => {
                if let (Ok(name), Ok(value)) =
                    (name.parse::<reqwest::header::HeaderName>(), value.parse())
                {
                    default_headers.insert(name, value);
                }
            }
            AuthStrategy::QueryParam { name, value } => {
                query_auth = Some((name, value));
            }
            AuthStrategy::None => {}
        }

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            fallback_url: fallback_url.map(|u| u.trim_end_matches('/').to_string()),
            default_headers,
            query_auth,
        })
    }

    /// Add a default header sent on every request (e.g. a wire-version pin).
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.parse::<reqwest::header::HeaderName>(),
            value.parse(),
        ) {
            self.default_headers.insert(name, value);
        }
        self
    }

    fn build_url(&self, base: &str, path: &str) -> String {
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    async fn send(
        &self,
        method: Method,
        base: &str,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, AdapterError> {
        let url = self.build_url(base, path);
        let mut request = self
            .http
            .request(method, url)
            .headers(self.default_headers.clone());
        if let Some((name, value)) = &self.query_auth {
            request = request.query(&[(name.as_str(), value.as_str())]);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// Send a request, retrying once against the fallback endpoint when the
    /// primary is unreachable (DNS/connect failure), never on HTTP errors.
    async fn send_with_fallback(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, AdapterError> {
        match self.send(method.clone(), &self.base_url, path, body).await {
            Ok(resp) => Ok(resp),
            Err(err) if err.kind == ErrorKind::UpstreamUnavailable => {
                let Some(fallback) = &self.fallback_url else {
                    return Err(err);
                };
                tracing::info!(
                    primary = %self.base_url,
                    fallback = %fallback,
                    "primary endpoint unreachable, retrying on fallback"
                );
                self.send(method, fallback, path, body).await
            }
            Err(err) => Err(err),
        }
    }

    pub async fn post_json<TReq: Serialize, TResp: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TResp, AdapterError> {
        let body = serde_json::to_value(body)?;
        let resp = self
            .send_with_fallback(Method::POST, path, Some(&body))
            .await?;
        if !resp.status().is_success() {
            return Err(map_error_response(resp).await);
        }
        Ok(resp.json::<TResp>().await?)
    }

    /// POST returning the raw response, for streaming bodies. Status is not
    /// checked here; callers map error statuses themselves.
    pub async fn post_json_raw<TReq: Serialize>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<Response, AdapterError> {
        let body = serde_json::to_value(body)?;
        self.send_with_fallback(Method::POST, path, Some(&body))
            .await
    }

    pub async fn get_json<TResp: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<TResp, AdapterError> {
        let resp = self.send_with_fallback(Method::GET, path, None).await?;
        if !resp.status().is_success() {
            return Err(map_error_response(resp).await);
        }
        Ok(resp.json::<TResp>().await?)
    }
}

/// Map a non-success upstream response into the closed taxonomy, pulling a
/// message out of the common `{"error":{"message":...}}` shapes when
/// present.
pub async fn map_error_response(resp: Response) -> AdapterError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .or_else(|| v.get("message"))
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or(body);

    // Context-window overruns usually come back as 400 with a telltale
    // message; classify them before the generic status mapping.
    let lowered = message.to_lowercase();
    if status == 400
        && (lowered.contains("context length") || lowered.contains("maximum context"))
    {
        return AdapterError::new(ErrorKind::ContextLengthExceeded, message);
    }
    if status == 429 && (lowered.contains("quota") || lowered.contains("billing")) {
        return AdapterError::new(ErrorKind::QuotaExhausted, message);
    }
    AdapterError::from_status(status, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joining_handles_both_slash_forms() {
        let client = HttpProviderClient::new(
            Duration::from_secs(5),
            "https://api.example.com/v1/",
            None,
            AuthStrategy::None,
        )
        .unwrap();
        assert_eq!(
            client.build_url(&client.base_url, "/chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            client.build_url(&client.base_url, "chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
    }
}
