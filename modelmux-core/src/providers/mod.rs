//! # Provider Adapters
//!
//! The uniform capability to send one normalized request to one upstream
//! provider. An adapter owns everything wire-specific: request shape,
//! headers, endpoint selection (including one fallback-endpoint retry per
//! invocation on connect failure), response parsing, streaming decode and
//! error normalization into the closed [`ErrorKind`](crate::error::ErrorKind)
//! taxonomy.
//!
//! ## Overview
//!
//! - **ProviderAdapter**: the trait every wire dialect implements
//! - **create_adapter**: factory keyed on [`ProviderKind`]
//! - **ChunkStream**: streaming responses as OpenAI `chat.completion.chunk`
//!   records; zero or more chunks, then exactly one terminal event
//!
//! ## Streaming contract
//!
//! A returned stream yields chunks in upstream order and ends either by
//! running dry (normal end) or with a single `Err` item. Dropping the
//! stream closes the upstream connection; an idle read of more than 60
//! seconds ends the stream with a transient error.
//!
//! ## Supported dialects
//!
//! - **openai-compatible** (also serves `generic`): native wire format
//! - **anthropic-style**: messages API with event-stream decode
//! - **gemini**: generateContent / streamGenerateContent
//! - **cloudflare-ai**: Workers AI run endpoint

use crate::error::{AdapterError, ErrorKind};
use crate::models::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, StreamChunk};
use crate::registry::{ProviderDefinition, ProviderKind};
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;

pub mod anthropic;
pub mod cloudflare;
pub mod gemini;
pub mod http_client;
pub mod openai_compat;

/// Pinned boxed stream of decoded chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, AdapterError>> + Send>>;

/// Idle-read timeout applied between stream frames.
pub const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Uniform interface over one upstream provider.
///
/// Requests arrive already normalized: the `model` field carries the
/// provider-specific identifier from the binding, and the credential was
/// resolved at construction time.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Wire dialect this adapter speaks.
    fn kind(&self) -> ProviderKind;

    /// Provider key this adapter was built for.
    fn provider_key(&self) -> &str;

    /// Non-streaming chat completion.
    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse, AdapterError>;

    /// Streaming chat completion. See the module-level streaming contract.
    async fn stream_chat_completion(
        &self,
        request: ChatRequest,
    ) -> Result<ChunkStream, AdapterError>;

    /// Embedding generation. Dialects without an embedding surface reject
    /// the request as invalid.
    async fn embedding(
        &self,
        _request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, AdapterError> {
        Err(AdapterError::new(
            ErrorKind::InvalidRequest,
            "embeddings not supported by this provider",
        ))
    }
}

/// Per-invocation settings shared by all adapters.
#[derive(Debug, Clone, Copy)]
pub struct AdapterTimeouts {
    /// Applied to non-streaming request/response cycles
    pub request: Duration,
    /// Applied between frames of a streaming response
    pub stream_idle: Duration,
}

impl Default for AdapterTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(30),
            stream_idle: STREAM_IDLE_TIMEOUT,
        }
    }
}

/// Build the adapter for a provider definition.
///
/// `credential` is the secret resolved from the provider's
/// `credential_ref` by the credential store.
pub fn create_adapter(
    provider: &ProviderDefinition,
    credential: &str,
    timeouts: AdapterTimeouts,
) -> Result<Box<dyn ProviderAdapter>, AdapterError> {
    match provider.kind {
        ProviderKind::OpenaiCompatible | ProviderKind::Generic => Ok(Box::new(
            openai_compat::OpenAiCompatAdapter::new(provider, credential, timeouts)?,
        )),
        ProviderKind::AnthropicStyle => Ok(Box::new(anthropic::AnthropicAdapter::new(
            provider, credential, timeouts,
        )?)),
        ProviderKind::Gemini => Ok(Box::new(gemini::GeminiAdapter::new(
            provider, credential, timeouts,
        )?)),
        ProviderKind::CloudflareAi => Ok(Box::new(cloudflare::CloudflareAdapter::new(
            provider, credential, timeouts,
        )?)),
    }
}
