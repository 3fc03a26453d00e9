//! Gemini adapter. Maps the OpenAI chat shape onto `generateContent` /
//! `streamGenerateContent` with the key carried as a query parameter.

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

pub struct GeminiAdapter {
    http: HttpProviderClient,
    provider_key: String,
    timeouts: AdapterTimeouts,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WirePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCandidate {
    content: Option<WireContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

fn finish_reason(reason: Option<&str>) -> Option<String> {
    reason.map(|r| {
        match r {
            "STOP" => "stop",
            "MAX_TOKENS" => "length",
            other => other,
        }
        .to_ascii_lowercase()
    })
}

fn candidate_text(candidate: &WireCandidate) -> String {
    candidate
        .content
        .as_ref()
        .map(|c| {
            c.parts
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

impl GeminiAdapter {
    pub fn new(
        provider: &ProviderDefinition,
        credential: &str,
        timeouts: AdapterTimeouts,
    ) -> Result<Self, AdapterError> {
        let http = HttpProviderClient::new(
            timeouts.request,
            &provider.base_endpoint,
            provider.fallback_endpoint.as_deref(),
            AuthStrategy::QueryParam {
                name: "key".to_string(),
                value: credential.to_string(),
            },
        )?;
        Ok(Self {
            http,
            provider_key: provider.key.clone(),
            timeouts,
        })
    }

    fn build_request(&self, request: &ChatRequest) -> GenerateRequest {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();
        for msg in &request.messages {
            let text = msg.content_text();
            match msg.role {
                Role::System => system_parts.push(WirePart { text }),
                Role::User => contents.push(WireContent {
                    role: Some("user".to_string()),
                    parts: vec![WirePart { text }],
                }),
                Role::Assistant => contents.push(WireContent {
                    role: Some("model".to_string()),
                    parts: vec![WirePart { text }],
                }),
                Role::Tool => continue,
            }
        }

        GenerateRequest {
            contents,
            system_instruction: (!system_parts.is_empty()).then_some(WireContent {
                role: None,
                parts: system_parts,
            }),
            generation_config: Some(GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
                top_p: request.top_p,
                stop_sequences: request.stop.clone(),
            }),
        }
    }

    fn convert_response(&self, model: &str, response: GenerateResponse) -> ChatResponse {
        let (content, reason) = response
            .candidates
            .first()
            .map(|c| (candidate_text(c), finish_reason(c.finish_reason.as_deref())))
            .unwrap_or_default();

        ChatResponse {
            id: format!("gen-{}", uuid::Uuid::new_v4()),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model: model.to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(content),
                finish_reason: reason,
                logprobs: None,
            }],
            usage: response.usage_metadata.map(|u| Usage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.prompt_token_count + u.candidates_token_count,
            }),
            system_fingerprint: None,
        }
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn provider_key(&self) -> &str {
        &self.provider_key
    }

    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse, AdapterError> {
        let path = format!("/v1beta/models/{}:generateContent", request.model);
        let wire_request = self.build_request(&request);
        let response: GenerateResponse = self.http.post_json(&path, &wire_request).await?;
        Ok(self.convert_response(&request.model, response))
    }

    async fn stream_chat_completion(
        &self,
        request: ChatRequest,
    ) -> Result<ChunkStream, AdapterError> {
        let path = format!(
            "/v1beta/models/{}:streamGenerateContent?alt=sse",
            request.model
        );
        let wire_request = self.build_request(&request);
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
                            match serde_json::from_str::<GenerateResponse>(json_str) {
                                Ok(piece) => {
                                    let Some(candidate) = piece.candidates.first() else {
                                        continue;
                                    };
                                    let text = candidate_text(candidate);
                                    let reason =
                                        finish_reason(candidate.finish_reason.as_deref());
                                    let done = reason.is_some();
                                    yield Ok(StreamChunk {
                                        id: format!("gen-{}", uuid::Uuid::new_v4()),
                                        object: "chat.completion.chunk".to_string(),
                                        created: chrono::Utc::now().timestamp() as u64,
                                        model: model.clone(),
                                        choices: vec![StreamChoice {
                                            index: 0,
                                            delta: Delta {
                                                content: (!text.is_empty()).then_some(text),
                                                ..Default::default()
                                            },
                                            finish_reason: reason,
                                        }],
                                        usage: None,
                                    });
                                    if done {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    yield Err(AdapterError::from(e));
                                    return;
                                }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_map_to_user_and_model() {
        let provider = ProviderDefinition {
            key: "gemini".to_string(),
            kind: ProviderKind::Gemini,
            base_endpoint: "https://generativelanguage.googleapis.com".to_string(),
            fallback_endpoint: None,
            tier: 1,
            enabled: true,
            free: false,
            credential_ref: "c".to_string(),
            default_rpm: None,
            default_tpm: None,
        };
        let adapter = GeminiAdapter::new(&provider, "key", AdapterTimeouts::default()).unwrap();
        let request = ChatRequest {
            model: "gemini-1.5-flash".to_string(),
            messages: vec![
                Message::system("short answers"),
                Message::user("hello"),
                Message::assistant("hi there"),
            ],
            ..Default::default()
        };
        let wire = adapter.build_request(&request);
        assert!(wire.system_instruction.is_some());
        assert_eq!(wire.contents.len(), 2);
        assert_eq!(wire.contents[0].role.as_deref(), Some("user"));
        assert_eq!(wire.contents[1].role.as_deref(), Some("model"));
    }
}
