//! # HTTP Request Handlers
//!
//! The OpenAI-compatible surface of the gateway.
//!
//! ## Endpoints
//!
//! - `POST /v1/chat/completions`: chat completions, streaming and not
//! - `POST /v1/completions`: legacy completions, converted to chat
//! - `POST /v1/responses`: responses surface, converted to chat
//! - `POST /v1/embeddings`: embeddings
//! - `GET /v1/models`, `GET /v1/models/{id}`: the canonical catalog plus
//!   visible aliases
//! - `GET /health`: liveness
//!
//! ## Request flow
//!
//! Bodies are decoded by hand so malformed JSON maps onto the gateway's
//! own error envelope (`param = "body"`). Capabilities are derived from
//! the body (stream flag, tools, image parts, JSON-schema response format,
//! logprobs), the request context gets a deadline, and execution goes
//! through the deduplicator (non-streaming only) into the fallback
//! orchestrator. The response echoes the client-supplied model id.
//!
//! ## Streaming
//!
//! Streaming requests bypass deduplication and produce
//! `text/event-stream`: the upstream chunk stream is pumped into a bounded
//! channel, each chunk framed as `data: <json>\n\n`, terminated by
//! `data: [DONE]\n\n`. A client disconnect closes the channel, which drops
//! the upstream stream and cancels the invocation; nothing more is
//! written and no health state is touched.

use crate::dedup;
use crate::gateway_error::GatewayError;
use crate::middleware::CorrelationId;
use crate::request_context::{derive_capabilities, Principal, RequestContext};
use crate::server::AppState;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Response, StatusCode};
use axum::response::Json;
use axum::Extension;
use futures::StreamExt;
use modelmux_core::error::{AdapterError, ErrorKind};
use modelmux_core::models::{
    ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, Message, Usage,
};
use modelmux_core::orchestrator::AttemptSuccess;
use modelmux_core::registry::EndpointKind;
use modelmux_core::router::EnrichedCandidate;
use serde_json::{json, Value};

fn decode_body<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, GatewayError> {
    serde_json::from_slice(body).map_err(|e| GatewayError::invalid_body(format!("malformed JSON: {e}")))
}

fn validate_chat_request(request: &ChatRequest) -> Result<(), GatewayError> {
    if request.model.is_empty() {
        return Err(GatewayError::InvalidRequest {
            message: "'model' is required".to_string(),
            param: Some("model".to_string()),
        });
    }
    if request.messages.is_empty() {
        return Err(GatewayError::InvalidRequest {
            message: "'messages' must not be empty".to_string(),
            param: Some("messages".to_string()),
        });
    }
    Ok(())
}

fn preferred_provider(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-preferred-provider")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

/// Echo the client-supplied model id and make sure the envelope fields are
/// populated even when a lean upstream left them empty.
fn normalize_chat_response(requested_model: &str, mut response: ChatResponse) -> ChatResponse {
    response.model = requested_model.to_string();
    if response.id.is_empty() {
        response.id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
    }
    if response.object.is_empty() {
        response.object = "chat.completion".to_string();
    }
    if response.created == 0 {
        response.created = chrono::Utc::now().timestamp() as u64;
    }
    response
}

/// Rewrite the wire model id for one candidate.
fn normalized_request(request: &ChatRequest, candidate: &EnrichedCandidate) -> ChatRequest {
    let mut normalized = request.clone();
    normalized.model = candidate.binding.provider_specific_id.clone();
    normalized
}

async fn run_chat_attempt(
    state: &AppState,
    request: &ChatRequest,
    candidate: EnrichedCandidate,
) -> Result<AttemptSuccess<ChatResponse>, AdapterError> {
    let adapter = state.adapters.get(&candidate.provider.key).cloned().ok_or_else(|| {
        AdapterError::new(
            ErrorKind::UpstreamUnavailable,
            format!("no adapter constructed for provider {}", candidate.provider.key),
        )
    })?;
    let normalized = normalized_request(request, &candidate);
    let attempt = tokio::time::timeout(
        state.config.timeouts.per_attempt(),
        adapter.chat_completion(normalized),
    )
    .await
    .map_err(|_| AdapterError::new(ErrorKind::Transient, "per-attempt timeout elapsed"))??;
    let usage = attempt.usage;
    Ok(AttemptSuccess {
        value: attempt,
        usage,
    })
}

async fn orchestrate_chat(
    state: &AppState,
    context: &RequestContext,
    request: &ChatRequest,
) -> Result<ChatResponse, GatewayError> {
    let route = context.route_request(&request.model);
    let outcome = state
        .orchestrator
        .execute(&route, |candidate| run_chat_attempt(state, request, candidate))
        .await?;
    Ok(normalize_chat_response(&request.model, outcome.value))
}

/// `POST /v1/chat/completions`
pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(correlation): Extension<CorrelationId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response<Body>, GatewayError> {
    let request: ChatRequest = decode_body(&body)?;
    validate_chat_request(&request)?;

    let context = RequestContext::new(EndpointKind::ChatCompletions, principal)
        .with_request_id(correlation.0)
        .with_capabilities(derive_capabilities(&request))
        .with_preferred_provider(preferred_provider(&headers));

    if request.stream.unwrap_or(false) {
        return stream_chat_completions(state, context, request).await;
    }
    let context = context.with_deadline(state.config.timeouts.request());

    let fp = dedup::fingerprint(
        EndpointKind::ChatCompletions,
        context.principal.tenant_id.as_deref(),
        &serde_json::to_value(&request)?,
    );
    let response = state
        .dedup
        .execute(&fp, || orchestrate_chat(&state, &context, &request))
        .await?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&response)?))
        .unwrap())
}

async fn stream_chat_completions(
    state: AppState,
    context: RequestContext,
    request: ChatRequest,
) -> Result<Response<Body>, GatewayError> {
    let route = context.route_request(&request.model);
    let outcome = state
        .orchestrator
        .execute(&route, |candidate| {
            let state = state.clone();
            let request = request.clone();
            async move {
                let adapter = state
                    .adapters
                    .get(&candidate.provider.key)
                    .cloned()
                    .ok_or_else(|| {
                        AdapterError::new(
                            ErrorKind::UpstreamUnavailable,
                            format!(
                                "no adapter constructed for provider {}",
                                candidate.provider.key
                            ),
                        )
                    })?;
                let normalized = normalized_request(&request, &candidate);
                let stream = adapter.stream_chat_completion(normalized).await?;
                // Stream establishment is the success signal; tokens are
                // accounted when the stream completes
                Ok(AttemptSuccess {
                    value: stream,
                    usage: None,
                })
            }
        })
        .await?;

    let requested_model = request.model.clone();
    let provider_key = outcome.provider_key.clone();
    let (tx, rx) = tokio::sync::mpsc::channel::<String>(64);

    let pump_state = state.clone();
    tokio::spawn(async move {
        let mut stream = outcome.value;
        let mut usage: Option<Usage> = None;

        while let Some(chunk_result) = stream.next().await {
            match chunk_result {
                Ok(mut chunk) => {
                    chunk.model = requested_model.clone();
                    if let Some(chunk_usage) = chunk.usage {
                        usage = Some(chunk_usage);
                    }
                    let frame = match serde_json::to_string(&chunk) {
                        Ok(encoded) => format!("data: {encoded}\n\n"),
                        Err(e) => {
                            tracing::warn!("stream chunk encode failed: {e}");
                            continue;
                        }
                    };
                    if tx.send(frame).await.is_err() {
                        // Client went away: dropping the stream closes the
                        // upstream connection, nothing else to write
                        tracing::debug!(provider = %provider_key, "client disconnected mid-stream");
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(provider = %provider_key, "stream error: {e}");
                    let frame = format!(
                        "data: {}\n\n",
                        json!({"error": {"message": "stream interrupted", "type": "server_error"}})
                    );
                    let _ = tx.send(frame).await;
                    let _ = tx.send("data: [DONE]\n\n".to_string()).await;
                    return;
                }
            }
        }

        if let Some(usage) = usage {
            pump_state.orchestrator.router().quota().record_usage(
                &provider_key,
                usage.prompt_tokens,
                usage.completion_tokens,
            );
        }
        let _ = tx.send("data: [DONE]\n\n".to_string()).await;
    });

    let body = Body::from_stream(
        tokio_stream::wrappers::ReceiverStream::new(rx)
            .map(|frame| Ok::<Bytes, std::io::Error>(frame.into())),
    );

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .header("connection", "keep-alive")
        .body(body)
        .unwrap())
}

/// `POST /v1/completions`, the legacy surface, converted to chat and back.
pub async fn completions(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(correlation): Extension<CorrelationId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response<Body>, GatewayError> {
    let raw: Value = decode_body(&body)?;
    let chat_request = convert_legacy_completion_to_chat(&raw)?;

    let context = RequestContext::new(EndpointKind::Completions, principal)
        .with_request_id(correlation.0)
        .with_capabilities(derive_capabilities(&chat_request))
        .with_preferred_provider(preferred_provider(&headers));

    if chat_request.stream.unwrap_or(false) {
        return stream_chat_completions(state, context, chat_request).await;
    }
    let context = context.with_deadline(state.config.timeouts.request());

    let fp = dedup::fingerprint(
        EndpointKind::Completions,
        context.principal.tenant_id.as_deref(),
        &raw,
    );
    let response = state
        .dedup
        .execute(&fp, || orchestrate_chat(&state, &context, &chat_request))
        .await?;
    let legacy = convert_chat_to_legacy_completion(response)?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&legacy)?))
        .unwrap())
}

/// `POST /v1/responses`, converted to chat and back.
pub async fn responses(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(correlation): Extension<CorrelationId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response<Body>, GatewayError> {
    let raw: Value = decode_body(&body)?;
    let chat_request = convert_responses_to_chat(&raw)?;

    let context = RequestContext::new(EndpointKind::Responses, principal)
        .with_request_id(correlation.0)
        .with_capabilities(derive_capabilities(&chat_request))
        .with_preferred_provider(preferred_provider(&headers));

    if chat_request.stream.unwrap_or(false) {
        return stream_chat_completions(state, context, chat_request).await;
    }
    let context = context.with_deadline(state.config.timeouts.request());

    let fp = dedup::fingerprint(
        EndpointKind::Responses,
        context.principal.tenant_id.as_deref(),
        &raw,
    );
    let response = state
        .dedup
        .execute(&fp, || orchestrate_chat(&state, &context, &chat_request))
        .await?;
    let converted = convert_chat_to_response_object(response)?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&converted)?))
        .unwrap())
}

/// `POST /v1/embeddings`
pub async fn embeddings(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(correlation): Extension<CorrelationId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<EmbeddingResponse>, GatewayError> {
    let request: EmbeddingRequest = decode_body(&body)?;
    if request.model.is_empty() {
        return Err(GatewayError::InvalidRequest {
            message: "'model' is required".to_string(),
            param: Some("model".to_string()),
        });
    }

    let context = RequestContext::new(EndpointKind::Embeddings, principal)
        .with_request_id(correlation.0)
        .with_preferred_provider(preferred_provider(&headers))
        .with_deadline(state.config.timeouts.request());

    let fp = dedup::fingerprint(
        EndpointKind::Embeddings,
        context.principal.tenant_id.as_deref(),
        &serde_json::to_value(&request)?,
    );

    let requested_model = request.model.clone();
    let response = state
        .dedup
        .execute(&fp, || async {
            let route = context.route_request(&request.model);
            let outcome = state
                .orchestrator
                .execute(&route, |candidate| {
                    let state = state.clone();
                    let request = request.clone();
                    async move {
                        let adapter = state
                            .adapters
                            .get(&candidate.provider.key)
                            .cloned()
                            .ok_or_else(|| {
                                AdapterError::new(
                                    ErrorKind::UpstreamUnavailable,
                                    format!(
                                        "no adapter constructed for provider {}",
                                        candidate.provider.key
                                    ),
                                )
                            })?;
                        let mut normalized = request.clone();
                        normalized.model = candidate.binding.provider_specific_id.clone();
                        let response = tokio::time::timeout(
                            state.config.timeouts.per_attempt(),
                            adapter.embedding(normalized),
                        )
                        .await
                        .map_err(|_| {
                            AdapterError::new(ErrorKind::Transient, "per-attempt timeout elapsed")
                        })??;
                        let usage = Some(response.usage);
                        Ok(AttemptSuccess {
                            value: response,
                            usage,
                        })
                    }
                })
                .await?;
            Ok::<_, GatewayError>(outcome.value)
        })
        .await?;

    let mut response = response;
    response.model = requested_model;
    Ok(Json(response))
}

/// `GET /v1/models`
pub async fn list_models(State(state): State<AppState>) -> Result<Json<Value>, GatewayError> {
    let snapshot = state.registry.snapshot();
    let mut data: Vec<Value> = snapshot
        .canonical_models()
        .map(|model| {
            json!({
                "id": model.id,
                "object": "model",
                "created": model
                    .release_date
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| dt.and_utc().timestamp())
                    .unwrap_or(0),
                "owned_by": model.family,
            })
        })
        .collect();
    for (name, candidates) in snapshot.global_aliases() {
        data.push(json!({
            "id": name,
            "object": "model",
            "created": 0,
            "owned_by": "modelmux",
            "alias_for": candidates,
        }));
    }
    data.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));

    Ok(Json(json!({
        "object": "list",
        "data": data,
    })))
}

/// `GET /v1/models/{id}`
pub async fn get_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let snapshot = state.registry.snapshot();
    if let Some(model) = snapshot.lookup_canonical(&id) {
        return Ok(Json(json!({
            "id": model.id,
            "object": "model",
            "created": model
                .release_date
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc().timestamp())
                .unwrap_or(0),
            "owned_by": model.family,
        })));
    }
    let candidates = snapshot.resolve_alias(&id, None);
    if !candidates.is_empty() {
        return Ok(Json(json!({
            "id": id,
            "object": "model",
            "created": 0,
            "owned_by": "modelmux",
            "alias_for": candidates,
        })));
    }
    Err(GatewayError::model_not_found(&id))
}

/// `GET /health`
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// Legacy completions conversion

fn convert_legacy_completion_to_chat(request: &Value) -> Result<ChatRequest, GatewayError> {
    let model = request
        .get("model")
        .and_then(|v| v.as_str())
        .ok_or_else(|| GatewayError::InvalidRequest {
            message: "'model' is required".to_string(),
            param: Some("model".to_string()),
        })?;
    let prompt = request
        .get("prompt")
        .and_then(|v| v.as_str())
        .ok_or_else(|| GatewayError::InvalidRequest {
            message: "'prompt' is required".to_string(),
            param: Some("prompt".to_string()),
        })?;

    Ok(ChatRequest {
        model: model.to_string(),
        messages: vec![Message::user(prompt)],
        max_tokens: request
            .get("max_tokens")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32),
        temperature: request
            .get("temperature")
            .and_then(|v| v.as_f64())
            .map(|v| v as f32),
        top_p: request.get("top_p").and_then(|v| v.as_f64()).map(|v| v as f32),
        stop: request.get("stop").and_then(|v| v.as_array()).map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        }),
        user: request
            .get("user")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        stream: request.get("stream").and_then(|v| v.as_bool()),
        ..Default::default()
    })
}

fn convert_chat_to_legacy_completion(response: ChatResponse) -> Result<Value, GatewayError> {
    let choice = response
        .choices
        .first()
        .ok_or_else(|| GatewayError::Internal {
            message: "no choices in upstream response".to_string(),
        })?;

    Ok(json!({
        "id": response.id,
        "object": "text_completion",
        "created": response.created,
        "model": response.model,
        "choices": [{
            "text": choice.message.content_text(),
            "index": choice.index,
            "logprobs": choice.logprobs,
            "finish_reason": choice.finish_reason,
        }],
        "usage": response.usage,
    }))
}

// Responses-surface conversion

fn convert_responses_to_chat(request: &Value) -> Result<ChatRequest, GatewayError> {
    let model = request
        .get("model")
        .and_then(|v| v.as_str())
        .ok_or_else(|| GatewayError::InvalidRequest {
            message: "'model' is required".to_string(),
            param: Some("model".to_string()),
        })?;

    let messages = match request.get("input") {
        Some(Value::String(text)) => vec![Message::user(text.clone())],
        Some(Value::Array(items)) => {
            // Items in chat-message shape pass through as-is
            serde_json::from_value(Value::Array(items.clone())).map_err(|e| {
                GatewayError::InvalidRequest {
                    message: format!("unsupported 'input' items: {e}"),
                    param: Some("input".to_string()),
                }
            })?
        }
        _ => {
            return Err(GatewayError::InvalidRequest {
                message: "'input' is required".to_string(),
                param: Some("input".to_string()),
            })
        }
    };

    Ok(ChatRequest {
        model: model.to_string(),
        messages,
        max_tokens: request
            .get("max_output_tokens")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32),
        temperature: request
            .get("temperature")
            .and_then(|v| v.as_f64())
            .map(|v| v as f32),
        stream: request.get("stream").and_then(|v| v.as_bool()),
        ..Default::default()
    })
}

fn convert_chat_to_response_object(response: ChatResponse) -> Result<Value, GatewayError> {
    let choice = response
        .choices
        .first()
        .ok_or_else(|| GatewayError::Internal {
            message: "no choices in upstream response".to_string(),
        })?;
    let usage = response.usage.unwrap_or_default();

    Ok(json!({
        "id": response.id,
        "object": "response",
        "created_at": response.created,
        "model": response.model,
        "status": "completed",
        "output": [{
            "type": "message",
            "role": "assistant",
            "content": [{
                "type": "output_text",
                "text": choice.message.content_text(),
            }],
        }],
        "usage": {
            "input_tokens": usage.prompt_tokens,
            "output_tokens": usage.completion_tokens,
            "total_tokens": usage.total_tokens,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelmux_core::models::Choice;

    fn chat_response(content: &str) -> ChatResponse {
        ChatResponse {
            id: "chatcmpl-1".to_string(),
            object: "chat.completion".to_string(),
            created: 1700000000,
            model: "upstream/model-id".to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(content),
                finish_reason: Some("stop".to_string()),
                logprobs: None,
            }],
            usage: Some(Usage {
                prompt_tokens: 1,
                completion_tokens: 1,
                total_tokens: 2,
            }),
            system_fingerprint: None,
        }
    }

    #[test]
    fn responses_normalize_to_the_requested_model_id() {
        let normalized = normalize_chat_response("deepseek-chat", chat_response("hello"));
        assert_eq!(normalized.model, "deepseek-chat");
        assert_eq!(normalized.id, "chatcmpl-1");
    }

    #[test]
    fn empty_envelope_fields_are_filled_in() {
        let mut response = chat_response("hello");
        response.id = String::new();
        response.object = String::new();
        response.created = 0;
        let normalized = normalize_chat_response("deepseek-chat", response);
        assert!(normalized.id.starts_with("chatcmpl-"));
        assert_eq!(normalized.object, "chat.completion");
        assert!(normalized.created > 0);
    }

    #[test]
    fn legacy_completion_round_trip() {
        let raw = json!({
            "model": "deepseek-chat",
            "prompt": "say hi",
            "max_tokens": 16,
            "temperature": 0.2,
        });
        let chat = convert_legacy_completion_to_chat(&raw).unwrap();
        assert_eq!(chat.model, "deepseek-chat");
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.max_tokens, Some(16));

        let legacy = convert_chat_to_legacy_completion(chat_response("hi")).unwrap();
        assert_eq!(legacy["object"], "text_completion");
        assert_eq!(legacy["choices"][0]["text"], "hi");
    }

    #[test]
    fn legacy_completion_requires_prompt() {
        let raw = json!({"model": "deepseek-chat"});
        let error = convert_legacy_completion_to_chat(&raw).unwrap_err();
        assert!(matches!(
            error,
            GatewayError::InvalidRequest { param: Some(ref p), .. } if p == "prompt"
        ));
    }

    #[test]
    fn responses_input_accepts_string_and_messages() {
        let from_string =
            convert_responses_to_chat(&json!({"model": "m", "input": "hello"})).unwrap();
        assert_eq!(from_string.messages.len(), 1);

        let from_messages = convert_responses_to_chat(&json!({
            "model": "m",
            "input": [{"role": "user", "content": "hello"}],
        }))
        .unwrap();
        assert_eq!(from_messages.messages.len(), 1);

        let converted = convert_chat_to_response_object(chat_response("hey")).unwrap();
        assert_eq!(converted["object"], "response");
        assert_eq!(converted["output"][0]["content"][0]["text"], "hey");
        assert_eq!(converted["usage"]["total_tokens"], 2);
    }

    #[test]
    fn chat_validation_rejects_missing_fields() {
        let no_model = ChatRequest {
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        assert!(validate_chat_request(&no_model).is_err());

        let no_messages = ChatRequest {
            model: "deepseek-chat".to_string(),
            ..Default::default()
        };
        assert!(validate_chat_request(&no_messages).is_err());
    }

    #[test]
    fn malformed_body_maps_to_body_param() {
        let error = decode_body::<ChatRequest>(&Bytes::from_static(b"{not json")).unwrap_err();
        assert!(matches!(
            error,
            GatewayError::InvalidRequest { param: Some(ref p), .. } if p == "body"
        ));
    }
}
