//! OpenAI-compatible adapter. Speaks the native wire format, so requests
//! pass through unchanged; also serves the `generic` provider kind for
//! self-hosted OpenAI-shaped endpoints.

use crate::error::{AdapterError, ErrorKind};
use crate::models::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, StreamChunk};
use crate::providers::http_client::{map_error_response, AuthStrategy, HttpProviderClient};
use crate::providers::{AdapterTimeouts, ChunkStream, ProviderAdapter};
use crate::registry::{ProviderDefinition, ProviderKind};
use async_stream::stream;
use futures::StreamExt;

pub struct OpenAiCompatAdapter {
    client: HttpProviderClient,
    kind: ProviderKind,
    provider_key: String,
    timeouts: AdapterTimeouts,
}

impl OpenAiCompatAdapter {
    pub fn new(
        provider: &ProviderDefinition,
        credential: &str,
        timeouts: AdapterTimeouts,
    ) -> Result<Self, AdapterError> {
        let client = HttpProviderClient::new(
            timeouts.request,
            &provider.base_endpoint,
            provider.fallback_endpoint.as_deref(),
            AuthStrategy::Bearer {
                token: credential.to_string(),
            },
        )?;
        Ok(Self {
            client,
            kind: provider.kind,
            provider_key: provider.key.clone(),
            timeouts,
        })
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn provider_key(&self) -> &str {
        &self.provider_key
    }

    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse, AdapterError> {
        self.client.post_json("/chat/completions", &request).await
    }

    async fn stream_chat_completion(
        &self,
        mut request: ChatRequest,
    ) -> Result<ChunkStream, AdapterError> {
        request.stream = Some(true);
        let response = self
            .client
            .post_json_raw("/chat/completions", &request)
            .await?;
        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }

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

                            if let Some(json_str) = line.strip_prefix("data: ") {
                                if json_str == "[DONE]" {
                                    return;
                                }
                                match serde_json::from_str::<StreamChunk>(json_str) {
                                    Ok(stream_chunk) => yield Ok(stream_chunk),
                                    Err(e) => {
                                        yield Err(AdapterError::from(e));
                                        return;
                                    }
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

    async fn embedding(
        &self,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, AdapterError> {
        self.client.post_json("/embeddings", &request).await
    }
}
