//! # Modelmux Core
//!
//! The routing and fallback engine behind the modelmux gateway. Clients
//! name a logical model; this crate resolves it to a canonical model and a
//! set of candidate upstream providers, scores and orders the candidates,
//! and executes the request with tiered fallback, quota accounting and
//! health tracking.
//!
//! ## Architecture
//!
//! - **`registry`**: canonical models, providers, bindings and aliases in
//!   an immutable snapshot with atomic replacement
//! - **`resolver`**: model id → canonical model + enabled bindings
//! - **`health`** / **`quota`** / **`costs`**: process-wide provider state
//!   (cooldowns, 60-second window counters, price and latency projections)
//! - **`policy`** / **`scoring`**: three-level policy merge and the
//!   deterministic candidate score
//! - **`router`**: filter, enrich, score, order
//! - **`orchestrator`**: the four-tier fallback execution loop
//! - **`providers`**: wire adapters normalizing upstream dialects and
//!   errors into OpenAI-shaped responses and the closed error taxonomy
//! - **`credentials`**: the secret-resolution seam
//!
//! The crate owns no HTTP server and no configuration format; the gateway
//! crate composes these pieces and exposes the OpenAI-compatible surface.
//!
//! ## Example
//!
//! ```rust,ignore
//! use modelmux_core::orchestrator::{FallbackOrchestrator, RouteRequest, AttemptSuccess};
//! use modelmux_core::registry::EndpointKind;
//!
//! let request = RouteRequest::new("deepseek-chat", EndpointKind::ChatCompletions);
//! let outcome = orchestrator
//!     .execute(&request, |candidate| async move {
//!         let adapter = adapters.get(&candidate.provider.key)?;
//!         let response = adapter.chat_completion(normalized(&candidate)).await?;
//!         Ok(AttemptSuccess { usage: response.usage, value: response })
//!     })
//!     .await?;
//! ```

pub mod costs;
pub mod credentials;
pub mod error;
pub mod health;
pub mod models;
pub mod orchestrator;
pub mod policy;
pub mod providers;
pub mod quota;
pub mod registry;
pub mod resolver;
pub mod router;
pub mod scoring;

pub use error::{AdapterError, ErrorKind};
pub use models::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, StreamChunk};
pub use orchestrator::{AttemptSuccess, ExecutionOutcome, FallbackOrchestrator, RouteRequest};
pub use registry::{CapabilitySet, EndpointKind, ModelRegistry, RegistrySnapshot};
pub use router::{EnrichedCandidate, SmartRouter};
