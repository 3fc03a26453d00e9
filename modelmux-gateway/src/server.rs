//! # HTTP Server
//!
//! The composition root. Builds every process-wide component from
//! configuration (registry snapshot, health store, quota tracker, cost
//! view, policy store, provider adapters, deduplicator, auth service),
//! wires them into the [`AppState`], and assembles the axum router with
//! its middleware stack. All process-wide state is owned here; nothing in
//! the engine reaches for globals.

use crate::auth::{auth_middleware, AuthService};
use crate::config::Config;
use crate::dedup::InFlightDeduplicator;
use crate::handlers;
use crate::middleware::correlation_middleware;
use axum::extract::DefaultBodyLimit;
use axum::{
    routing::{get, post},
    Router,
};
use modelmux_core::costs::CostView;
use modelmux_core::credentials::{CredentialStore, StaticCredentialStore};
use modelmux_core::health::HealthStore;
use modelmux_core::orchestrator::FallbackOrchestrator;
use modelmux_core::policy::PolicyStore;
use modelmux_core::providers::{create_adapter, AdapterTimeouts, ProviderAdapter};
use modelmux_core::quota::QuotaTracker;
use modelmux_core::registry::{ModelRegistry, SnapshotSource};
use modelmux_core::router::SmartRouter;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;

/// Application state shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ModelRegistry>,
    pub orchestrator: Arc<FallbackOrchestrator>,
    pub adapters: Arc<HashMap<String, Arc<dyn ProviderAdapter>>>,
    pub dedup: Arc<InFlightDeduplicator>,
    pub auth: Arc<AuthService>,
}

/// Create and configure the HTTP server with all routes and middleware.
pub async fn create_server(config: Config) -> anyhow::Result<Router> {
    let registry = Arc::new(ModelRegistry::new(config.snapshot()));
    let health = Arc::new(HealthStore::new());
    let quota = Arc::new(QuotaTracker::new());
    let costs = Arc::new(CostView::new(config.price_table(), config.quality_table()));
    let policies = Arc::new(config.policy.clone());

    let credentials = StaticCredentialStore::new(config.credentials.clone());
    let timeouts = AdapterTimeouts {
        request: config.timeouts.per_attempt(),
        stream_idle: config.timeouts.stream_idle(),
    };

    let mut adapters: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
    for provider in config.provider_definitions() {
        if !provider.enabled {
            continue;
        }
        let credential = credentials
            .resolve(&provider.credential_ref)
            .map_err(|e| anyhow::anyhow!("provider {}: {e}", provider.key))?;
        let adapter = create_adapter(&provider, &credential, timeouts)
            .map_err(|e| anyhow::anyhow!("provider {}: {e}", provider.key))?;
        adapters.insert(provider.key.clone(), Arc::from(adapter));
    }
    if adapters.is_empty() {
        tracing::warn!("no enabled providers configured; all routed requests will fail");
    }

    let smart_router = Arc::new(SmartRouter::new(
        registry.clone(),
        health,
        quota,
        costs,
        policies,
    ));
    let orchestrator = Arc::new(FallbackOrchestrator::new(smart_router));
    let dedup = Arc::new(InFlightDeduplicator::new(config.dedup.clone()));
    let auth = Arc::new(AuthService::new(config.auth.clone()));

    let max_body_size = config.server.max_body_size;
    let request_timeout = config.timeouts.request();

    let state = AppState {
        config: Arc::new(config),
        registry,
        orchestrator,
        adapters: Arc::new(adapters),
        dedup,
        auth,
    };

    let app = Router::new()
        // OpenAI-compatible endpoints
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/completions", post(handlers::completions))
        .route("/v1/responses", post(handlers::responses))
        .route("/v1/embeddings", post(handlers::embeddings))
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/models/{id}", get(handlers::get_model))
        // Liveness
        .route("/health", get(handlers::health_check))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(correlation_middleware))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    auth_middleware,
                ))
                .layer(DefaultBodyLimit::max(max_body_size))
                // Streaming responses outlive this; axum applies it to the
                // response head, and stream bodies flow chunk by chunk
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(state);

    Ok(app)
}
