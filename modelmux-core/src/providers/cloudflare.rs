//! Cloudflare Workers AI adapter. The base endpoint is the account-scoped
//! `.../ai` prefix; models run under `/run/{model}` and return
//! `{result, success, errors}` envelopes. Streaming emits
//! `data: {"response": ...}` lines terminated by `[DONE]`.

use crate::error::{AdapterError, ErrorKind};
use crate::models::{
    ChatRequest, ChatResponse, Choice, Delta, Message, StreamChoice, StreamChunk, Usage,
};
use crate::providers::http_client::{map_error_response, AuthStrategy, HttpProviderClient};
use crate::providers::{AdapterTimeouts, ChunkStream, ProviderAdapter};
use crate::registry::{ProviderDefinition, ProviderKind};
use async_stream::stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

pub struct CloudflareAdapter {
    http: HttpProviderClient,
    provider_key: String,
    timeouts: AdapterTimeouts,
}

#[derive(Debug, Serialize)]
struct RunRequest {
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct RunEnvelope {
    #[serde(default)]
    success: bool,
    result: Option<RunResult>,
    #[serde(default)]
    errors: Vec<EnvelopeError>,
}

#[derive(Debug, Deserialize)]
struct RunResult {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct EnvelopeError {
    #[serde(default)]
    message: String,
}

impl CloudflareAdapter {
    pub fn new(
        provider: &ProviderDefinition,
        credential: &str,
        timeouts: AdapterTimeouts,
    ) -> Result<Self, AdapterError> {
        let http = HttpProviderClient::new(
            timeouts.request,
            &provider.base_endpoint,
            provider.fallback_endpoint.as_deref(),
            AuthStrategy::Bearer {
                token: credential.to_string(),
            },
        )?;
        Ok(Self {
            http,
            provider_key: provider.key.clone(),
            timeouts,
        })
    }

    fn build_request(&self, request: &ChatRequest, stream: bool) -> RunRequest {
        RunRequest {
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: match m.role {
                        crate::models::Role::System => "system",
                        crate::models::Role::User => "user",
                        crate::models::Role::Assistant => "assistant",
                        crate::models::Role::Tool => "user",
                    }
                    .to_string(),
                    content: m.content_text(),
                })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: stream.then_some(true),
        }
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for CloudflareAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::CloudflareAi
    }

    fn provider_key(&self) -> &str {
        &self.provider_key
    }

    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse, AdapterError> {
        let path = format!("/run/{}", request.model);
        let wire_request = self.build_request(&request, false);
        let envelope: RunEnvelope = self.http.post_json(&path, &wire_request).await?;

        if !envelope.success {
            let message = envelope
                .errors
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "workers ai run failed".to_string());
            return Err(AdapterError::new(ErrorKind::Transient, message));
        }
        let content = envelope.result.map(|r| r.response).unwrap_or_default();

        Ok(ChatResponse {
            id: format!("cf-{}", uuid::Uuid::new_v4()),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model: request.model,
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(content),
                finish_reason: Some("stop".to_string()),
                logprobs: None,
            }],
            // Workers AI does not report token usage on this surface
            usage: Some(Usage::default()),
            system_fingerprint: None,
        })
    }

    async fn stream_chat_completion(
        &self,
        request: ChatRequest,
    ) -> Result<ChunkStream, AdapterError> {
        let path = format!("/run/{}", request.model);
        let wire_request = self.build_request(&request, true);
        let response = self.http.post_json_raw(&path, &wire_request).await?;
        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }

        let model = request.model.clone();
        let idle_timeout = self.timeouts.stream_idle;
        let stream = Box::pin(stream! {
            let mut bytes_stream = response.bytes_stream();
            let mut buffer = String::new();

            loop {
                let next = tokio::time::timeout(idle_timeout, bytes_stream.next()).await;
                let chunk_result = match next {
                    Ok(Some(result)) => result,
                    Ok(None) => return,
                    Err(_) => {
                        yield Err(AdapterError::new(
                            ErrorKind::Transient,
                            "stream idle timeout",
                        ));
                        return;
                    }
                };
                match chunk_result {
                    Ok(chunk) => {
                        buffer.push_str(&String::from_utf8_lossy(&chunk));

                        while let Some(line_end) = buffer.find('\n') {
                            let line = buffer[..line_end].trim().to_string();
                            buffer = buffer[line_end + 1..].to_string();

                            let Some(json_str) = line.strip_prefix("data: ") else {
                                continue;
                            };
                            if json_str == "[DONE]" {
                                return;
                            }
                            let Ok(piece) =
                                serde_json::from_str::<serde_json::Value>(json_str)
                            else {
                                continue;
                            };
                            if let Some(text) =
                                piece.get("response").and_then(|r| r.as_str())
                            {
                                yield Ok(StreamChunk {
                                    id: format!("cf-{}", uuid::Uuid::new_v4()),
                                    object: "chat.completion.chunk".to_string(),
                                    created: chrono::Utc::now().timestamp() as u64,
                                    model: model.clone(),
                                    choices: vec![StreamChoice {
                                        index: 0,
                                        delta: Delta {
                                            content: Some(text.to_string()),
                                            ..Default::default()
                                        },
                                        finish_reason: None,
                                    }],
                                    usage: None,
                                });
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(AdapterError::from(e));
                        return;
                    }
                }
            }
        });

        Ok(stream)
    }
}
