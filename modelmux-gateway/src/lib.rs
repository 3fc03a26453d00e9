//! # Modelmux Gateway
//!
//! OpenAI-compatible HTTP frontend over the modelmux routing engine.
//! Clients talk to `/v1/chat/completions`, `/v1/completions`,
//! `/v1/responses` and `/v1/embeddings` naming a logical model; the
//! gateway authenticates the caller, fingerprints and deduplicates the
//! request, routes it through tiered provider fallback, and returns either
//! a single JSON response or a `text/event-stream` of
//! `chat.completion.chunk` frames.
//!
//! ## Modules
//!
//! - **`config`**: TOML configuration with env overrides and validation
//! - **`server`**: composition root and axum router
//! - **`handlers`**: endpoint handlers and SSE framing
//! - **`auth`**: bearer API keys and HS256 JWTs → principal
//! - **`dedup`**: in-flight request deduplication
//! - **`middleware`**: correlation ids and access logs
//! - **`gateway_error`**: the OpenAI error envelope
//! - **`request_context`**: per-request state and capability derivation

pub mod auth;
pub mod config;
pub mod dedup;
pub mod gateway_error;
pub mod handlers;
pub mod middleware;
pub mod request_context;
pub mod server;

pub use config::Config;
pub use server::{create_server, AppState};
