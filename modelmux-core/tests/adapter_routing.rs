//! End-to-end routing scenarios against mock OpenAI-compatible upstreams:
//! free-first selection, fallback after a 429, the fallback endpoint, and
//! streaming decode.

use futures::StreamExt;
use modelmux_core::costs::{CostView, PriceTable, QualityTable};
use modelmux_core::health::HealthStore;
use modelmux_core::models::{ChatRequest, ChatResponse, Message};
use modelmux_core::orchestrator::{AttemptSuccess, FallbackOrchestrator, RouteRequest};
use modelmux_core::policy::PolicyStore;
use modelmux_core::providers::{create_adapter, AdapterTimeouts, ProviderAdapter};
use modelmux_core::quota::QuotaTracker;
use modelmux_core::registry::{
    CanonicalModel, CapabilitySet, EndpointKind, ModelRegistry, ProviderDefinition, ProviderKind,
    ProviderModelBinding, RegistrySnapshot,
};
use modelmux_core::router::SmartRouter;
use std::collections::HashMap;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(key: &str, endpoint: &str, free: bool) -> ProviderDefinition {
    ProviderDefinition {
        key: key.to_string(),
        kind: ProviderKind::OpenaiCompatible,
        base_endpoint: endpoint.to_string(),
        fallback_endpoint: None,
        tier: 1,
        enabled: true,
        free,
        credential_ref: format!("{key}-cred"),
        default_rpm: None,
        default_tpm: None,
    }
}

fn binding(provider: &str) -> ProviderModelBinding {
    ProviderModelBinding {
        canonical_id: "deepseek-chat".to_string(),
        provider_key: provider.to_string(),
        provider_specific_id: format!("{provider}/deepseek-chat"),
        available: true,
        override_input_price: None,
        override_output_price: None,
        rate_limit_rpm: None,
        rate_limit_tpm: None,
        free_tier: false,
    }
}

struct Harness {
    orchestrator: FallbackOrchestrator,
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

fn harness(providers: Vec<ProviderDefinition>) -> Harness {
    let bindings = providers.iter().map(|p| binding(&p.key)).collect();
    let snapshot = RegistrySnapshot::build(
        vec![CanonicalModel {
            id: "deepseek-chat".to_string(),
            family: "deepseek".to_string(),
            context_window: 65_536,
            max_output_tokens: 8192,
            capabilities: CapabilitySet::new(),
            release_date: None,
        }],
        providers.clone(),
        bindings,
        vec![],
    );
    let mut adapters: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
    for definition in &providers {
        adapters.insert(
            definition.key.clone(),
            Arc::from(create_adapter(definition, "test-key", AdapterTimeouts::default()).unwrap()),
        );
    }
    let router = SmartRouter::new(
        Arc::new(ModelRegistry::new(snapshot)),
        Arc::new(HealthStore::new()),
        Arc::new(QuotaTracker::new()),
        Arc::new(CostView::new(PriceTable::new(), QualityTable::new())),
        Arc::new(PolicyStore::default()),
    );
    Harness {
        orchestrator: FallbackOrchestrator::new(Arc::new(router)),
        adapters,
    }
}

fn chat_request() -> ChatRequest {
    ChatRequest {
        model: "deepseek-chat".to_string(),
        messages: vec![Message::user("hi")],
        stream: Some(false),
        ..Default::default()
    }
}

fn completion_body(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion",
        "created": 1700000000,
        "model": "deepseek-chat",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
    })
}

async fn execute_chat(harness: &Harness) -> Result<ChatResponse, modelmux_core::orchestrator::RouteError> {
    let request = RouteRequest::new("deepseek-chat", EndpointKind::ChatCompletions);
    let outcome = harness
        .orchestrator
        .execute(&request, |candidate| {
            let adapter = harness.adapters.get(&candidate.provider.key).cloned();
            async move {
                let adapter = adapter.expect("adapter exists for every configured provider");
                let mut wire_request = chat_request();
                wire_request.model = candidate.binding.provider_specific_id.clone();
                let response = adapter.chat_completion(wire_request).await?;
                let usage = response.usage;
                Ok(AttemptSuccess {
                    value: response,
                    usage,
                })
            }
        })
        .await?;
    Ok(outcome.value)
}

#[tokio::test]
async fn free_provider_is_invoked_first() {
    let free_upstream = MockServer::start().await;
    let paid_upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("hello")))
        .mount(&free_upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("hello")))
        .mount(&paid_upstream)
        .await;

    let harness = harness(vec![
        provider("deepseek", &paid_upstream.uri(), false),
        provider("openrouter", &free_upstream.uri(), true),
    ]);

    let response = execute_chat(&harness).await.unwrap();
    assert_eq!(response.choices[0].message.content_text(), "hello");
    assert_eq!(response.usage.unwrap().total_tokens, 2);
    assert_eq!(free_upstream.received_requests().await.unwrap().len(), 1);
    assert_eq!(paid_upstream.received_requests().await.unwrap().len(), 0);
}

#[tokio::test]
async fn rate_limited_free_provider_falls_back_to_paid() {
    let free_upstream = MockServer::start().await;
    let paid_upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_json(serde_json::json!({"error": {"message": "rate limited"}})),
        )
        .mount(&free_upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("fallback answer")))
        .mount(&paid_upstream)
        .await;

    let harness = harness(vec![
        provider("deepseek", &paid_upstream.uri(), false),
        provider("openrouter", &free_upstream.uri(), true),
    ]);

    let response = execute_chat(&harness).await.unwrap();
    assert_eq!(
        response.choices[0].message.content_text(),
        "fallback answer"
    );
    assert_eq!(free_upstream.received_requests().await.unwrap().len(), 1);
    assert_eq!(paid_upstream.received_requests().await.unwrap().len(), 1);

    // The rate-limited provider entered cooldown; the winner did not
    let health = harness.orchestrator.router().health();
    assert!(!health.is_healthy("openrouter"));
    assert!(health.is_healthy("deepseek"));
}

#[tokio::test]
async fn unreachable_primary_endpoint_uses_the_fallback_endpoint() {
    let fallback_upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("via fallback")))
        .mount(&fallback_upstream)
        .await;

    // Nothing listens on the primary endpoint
    let mut definition = provider("deepseek", "http://127.0.0.1:9", false);
    definition.fallback_endpoint = Some(fallback_upstream.uri());

    let harness = harness(vec![definition]);
    let response = execute_chat(&harness).await.unwrap();
    assert_eq!(response.choices[0].message.content_text(), "via fallback");
    assert_eq!(
        fallback_upstream.received_requests().await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn streaming_decodes_chunks_until_the_sentinel() {
    let upstream = MockServer::start().await;
    let sse_body = concat!(
        "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"A\"},\"finish_reason\":null}]}\n\n",
        "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"B\"},\"finish_reason\":null}]}\n\n",
        "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body, "text/event-stream"))
        .mount(&upstream)
        .await;

    let definition = provider("deepseek", &upstream.uri(), false);
    let adapter = create_adapter(&definition, "test-key", AdapterTimeouts::default()).unwrap();

    let mut request = chat_request();
    request.stream = Some(true);
    let mut stream = adapter.stream_chat_completion(request).await.unwrap();

    let mut contents = Vec::new();
    let mut finish_reasons = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.unwrap();
        if let Some(text) = &chunk.choices[0].delta.content {
            contents.push(text.clone());
        }
        if let Some(reason) = &chunk.choices[0].finish_reason {
            finish_reasons.push(reason.clone());
        }
    }
    // Chunks arrive in order; the sentinel terminates without surfacing
    assert_eq!(contents, vec!["A".to_string(), "B".to_string()]);
    assert_eq!(finish_reasons, vec!["stop".to_string()]);
}

#[tokio::test]
async fn auth_failure_surfaces_without_fallback() {
    let free_upstream = MockServer::start().await;
    let paid_upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(serde_json::json!({"error": {"message": "bad key"}})),
        )
        .mount(&free_upstream)
        .await;

    let harness = harness(vec![
        provider("deepseek", &paid_upstream.uri(), false),
        provider("openrouter", &free_upstream.uri(), true),
    ]);

    let error = execute_chat(&harness).await.unwrap_err();
    assert_eq!(error.kind, modelmux_core::ErrorKind::AuthFailed);
    // The paid provider was never consulted
    assert_eq!(paid_upstream.received_requests().await.unwrap().len(), 0);
}
