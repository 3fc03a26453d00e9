//! Anthropic-style adapter. Translates between the OpenAI chat shape and
//! the messages API: system turns collapse into a top-level system prompt,
//! responses and stream deltas come back as `chat.completion.chunk`
//! records.

use crate::error::{AdapterError, ErrorKind};
use crate::models::{
    ChatRequest, ChatResponse, Choice, Delta, Message, Role, StreamChoice, StreamChunk, Usage,
};
use crate::providers::http_client::{map_error_response, AuthStrategy, HttpProviderClient};
use crate::providers::{AdapterTimeouts, ChunkStream, ProviderAdapter};
use crate::registry::{ProviderDefinition, ProviderKind};
use async_stream::stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

const WIRE_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    http: HttpProviderClient,
    provider_key: String,
    timeouts: AdapterTimeouts,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    id: String,
    content: Vec<WireContent>,
    model: String,
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct WireContent {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}

fn finish_reason(stop_reason: Option<&str>) -> Option<String> {
    stop_reason.map(|r| {
        match r {
            "end_turn" | "stop_sequence" => "stop",
            "max_tokens" => "length",
            "tool_use" => "tool_calls",
            other => other,
        }
        .to_string()
    })
}

impl AnthropicAdapter {
    pub fn new(
        provider: &ProviderDefinition,
        credential: &str,
        timeouts: AdapterTimeouts,
    ) -> Result<Self, AdapterError> {
        let http = HttpProviderClient::new(
            timeouts.request,
            &provider.base_endpoint,
            provider.fallback_endpoint.as_deref(),
            AuthStrategy::Header {
                name: "x-api-key".to_string(),
                value: credential.to_string(),
            },
        )?
        .with_header("anthropic-version", WIRE_VERSION);

        Ok(Self {
            http,
            provider_key: provider.key.clone(),
            timeouts,
        })
    }

    fn build_request(&self, request: &ChatRequest, stream: bool) -> MessagesRequest {
        let mut system = String::new();
        let mut messages = Vec::new();
        for msg in &request.messages {
            let text = msg.content_text();
            match msg.role {
                Role::System => {
                    if !text.is_empty() {
                        if !system.is_empty() {
                            system.push('\n');
                        }
                        system.push_str(&text);
                    }
                }
                Role::User => messages.push(WireMessage {
                    role: "user".to_string(),
                    content: text,
                }),
                Role::Assistant => messages.push(WireMessage {
                    role: "assistant".to_string(),
                    content: text,
                }),
                // Tool results have no counterpart in this transform
                Role::Tool => continue,
            }
        }

        MessagesRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(4096),
            messages,
            system: (!system.is_empty()).then_some(system),
            temperature: request.temperature,
            top_p: request.top_p,
            stop_sequences: request.stop.clone(),
            stream: stream.then_some(true),
        }
    }

    fn convert_response(&self, response: MessagesResponse) -> ChatResponse {
        let content = response
            .content
            .into_iter()
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        ChatResponse {
            id: response.id,
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model: response.model,
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(content),
                finish_reason: finish_reason(response.stop_reason.as_deref()),
                logprobs: None,
            }],
            usage: Some(Usage {
                prompt_tokens: response.usage.input_tokens,
                completion_tokens: response.usage.output_tokens,
                total_tokens: response.usage.input_tokens + response.usage.output_tokens,
            }),
            system_fingerprint: None,
        }
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AnthropicStyle
    }

    fn provider_key(&self) -> &str {
        &self.provider_key
    }

    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse, AdapterError> {
        let wire_request = self.build_request(&request, false);
        let response: MessagesResponse =
            self.http.post_json("/v1/messages", &wire_request).await?;
        Ok(self.convert_response(response))
    }

    async fn stream_chat_completion(
        &self,
        request: ChatRequest,
    ) -> Result<ChunkStream, AdapterError> {
        let wire_request = self.build_request(&request, true);
        let response = self
            .http
            .post_json_raw("/v1/messages", &wire_request)
            .await?;
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
                            let Ok(event) =
                                serde_json::from_str::<serde_json::Value>(json_str)
                            else {
                                continue;
                            };
                            match event.get("type").and_then(|t| t.as_str()) {
                                Some("message_stop") => return,
                                Some("content_block_delta") => {
                                    if let Some(text) = event
                                        .get("delta")
                                        .and_then(|d| d.get("text"))
                                        .and_then(|t| t.as_str())
                                    {
                                        yield Ok(StreamChunk {
                                            id: event
                                                .get("id")
                                                .and_then(|id| id.as_str())
                                                .unwrap_or("msg-stream")
                                                .to_string(),
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
                                Some("error") => {
                                    let message = event
                                        .get("error")
                                        .and_then(|e| e.get("message"))
                                        .and_then(|m| m.as_str())
                                        .unwrap_or("upstream stream error");
                                    yield Err(AdapterError::new(
                                        ErrorKind::Transient,
                                        message,
                                    ));
                                    return;
                                }
                                _ => {}
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
