//! # Request Context
//!
//! Per-request state threaded from the frontend down into routing: the
//! correlation id, the authenticated principal, the derived capability
//! requirements, the endpoint kind and the absolute deadline. Cancellation
//! is drop-based; the deadline is the explicit time bound checked between
//! fallback attempts.

use modelmux_core::models::ChatRequest;
use modelmux_core::orchestrator::RouteRequest;
use modelmux_core::registry::{Capability, CapabilitySet, EndpointKind};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// The authenticated caller, as resolved by the auth layer.
#[derive(Debug, Clone, Default)]
pub struct Principal {
    pub principal_id: String,
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
}

/// Everything the handlers know about one in-flight request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id, echoed on the `x-request-id` response header
    pub request_id: String,
    pub principal: Principal,
    pub endpoint_kind: EndpointKind,
    pub capabilities: CapabilitySet,
    /// Provider the caller pinned via the `x-preferred-provider` header
    pub preferred_provider: Option<String>,
    pub started: Instant,
    /// Absolute deadline; `None` for streaming requests, which live as long
    /// as the client connection
    pub deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(endpoint_kind: EndpointKind, principal: Principal) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            principal,
            endpoint_kind,
            capabilities: CapabilitySet::new(),
            preferred_provider: None,
            started: Instant::now(),
            deadline: None,
        }
    }

    /// Adopt the correlation id minted by the middleware layer.
    pub fn with_request_id(mut self, request_id: String) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_deadline(mut self, timeout: Duration) -> Self {
        self.deadline = Some(self.started + timeout);
        self
    }

    pub fn with_preferred_provider(mut self, provider: Option<String>) -> Self {
        self.preferred_provider = provider;
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// The core-side routing request for this context.
    pub fn route_request(&self, model_id: &str) -> RouteRequest {
        RouteRequest {
            model_id: model_id.to_string(),
            endpoint_kind: self.endpoint_kind,
            capabilities: self.capabilities.clone(),
            tenant_id: self.principal.tenant_id.clone(),
            user_id: self.principal.user_id.clone(),
            preferred_provider: self.preferred_provider.clone(),
            deadline: self.deadline,
        }
    }
}

/// Derive the required capability set from a chat request body.
///
/// Only demands raised by the body itself count: the stream flag, tool
/// definitions, image content parts, a JSON-schema response format, and
/// logprobs.
pub fn derive_capabilities(request: &ChatRequest) -> CapabilitySet {
    let mut capabilities = CapabilitySet::new();
    if request.stream.unwrap_or(false) {
        capabilities.insert(Capability::Streaming);
    }
    if request.tools.as_ref().is_some_and(|t| !t.is_empty()) {
        capabilities.insert(Capability::Tools);
    }
    if request.has_image_parts() {
        capabilities.insert(Capability::Vision);
    }
    if request.wants_structured_output() {
        capabilities.insert(Capability::StructuredOutput);
    }
    if request.logprobs.unwrap_or(false) {
        capabilities.insert(Capability::LogProbs);
    }
    capabilities
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelmux_core::models::{
        ContentPart, Function, ImageUrl, Message, MessageContent, ResponseFormat, Role, Tool,
    };

    #[test]
    fn plain_request_demands_nothing() {
        let request = ChatRequest {
            model: "deepseek-chat".to_string(),
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        assert!(derive_capabilities(&request).is_empty());
    }

    #[test]
    fn each_body_feature_raises_its_capability() {
        let request = ChatRequest {
            model: "deepseek-chat".to_string(),
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Parts(vec![
                    ContentPart::Text {
                        text: "what is in this image?".to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: "https://example.com/cat.png".to_string(),
                            detail: None,
                        },
                    },
                ]),
                name: None,
                tool_calls: None,
                tool_call_id: None,
            }],
            stream: Some(true),
            tools: Some(vec![Tool {
                tool_type: "function".to_string(),
                function: Function {
                    name: "lookup".to_string(),
                    description: None,
                    parameters: serde_json::json!({}),
                },
            }]),
            response_format: Some(ResponseFormat::JsonSchema {
                json_schema: serde_json::json!({"name": "out"}),
            }),
            logprobs: Some(true),
            ..Default::default()
        };

        let capabilities = derive_capabilities(&request);
        for capability in [
            Capability::Streaming,
            Capability::Tools,
            Capability::Vision,
            Capability::StructuredOutput,
            Capability::LogProbs,
        ] {
            assert!(capabilities.contains(capability), "{capability:?}");
        }
    }

    #[test]
    fn route_request_carries_the_principal_scope() {
        let context = RequestContext::new(
            EndpointKind::ChatCompletions,
            Principal {
                principal_id: "pk-1".to_string(),
                tenant_id: Some("acme".to_string()),
                user_id: Some("u1".to_string()),
            },
        )
        .with_deadline(Duration::from_secs(600))
        .with_preferred_provider(Some("deepseek".to_string()));

        let route = context.route_request("deepseek-chat");
        assert_eq!(route.tenant_id.as_deref(), Some("acme"));
        assert_eq!(route.user_id.as_deref(), Some("u1"));
        assert_eq!(route.preferred_provider.as_deref(), Some("deepseek"));
        assert!(route.deadline.is_some());
    }
}
