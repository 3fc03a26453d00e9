//! # Fallback Orchestrator
//!
//! Executes one request against the routed candidate list with four-tier
//! fallback. The tiers, attempted in order over a single resolution:
//!
//! 1. **Preferred**: exactly the caller's preferred provider, when routing
//!    produced it
//! 2. **Free**: every eligible free candidate, in routing order
//! 3. **Paid**: every eligible paid candidate, in routing order
//! 4. **Emergency**: any candidate that re-checks healthy, quota ignored
//!
//! Within a tier the orchestrator runs candidates strictly serially; the
//! first success wins. Health and quota are re-checked immediately before
//! every invocation because state may have moved while iterating.
//!
//! ## Outcome handling
//!
//! - success: `mark_success`, request/usage counters, latency EMA, return
//! - rate-limit or quota errors: short cooldown, try the next candidate
//! - transient or unreachable: escalating cooldown, try the next candidate
//! - client faults (auth, invalid request, context length, not found):
//!   terminal, surfaced immediately with no failure attribution
//! - canceled: stop without touching health state
//!
//! Exhausting every tier yields `UpstreamUnavailable` carrying the
//! per-attempt reasons; those are logged for operators and never embedded
//! in client responses.

use crate::error::{AdapterError, ErrorKind};
use crate::models::Usage;
use crate::registry::{CapabilitySet, EndpointKind};
use crate::router::{EnrichedCandidate, SmartRouter};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooldown after a 429/quota signal.
const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(30);
/// Base cooldown for transient faults; escalates with consecutive failures.
const TRANSIENT_COOLDOWN: Duration = Duration::from_secs(10);

/// Everything the orchestrator needs to route one request.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub model_id: String,
    pub endpoint_kind: EndpointKind,
    pub capabilities: CapabilitySet,
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub preferred_provider: Option<String>,
    /// Absolute deadline; elapsed means the request is canceled
    pub deadline: Option<Instant>,
}

impl RouteRequest {
    pub fn new(model_id: impl Into<String>, endpoint_kind: EndpointKind) -> Self {
        Self {
            model_id: model_id.into(),
            endpoint_kind,
            capabilities: CapabilitySet::new(),
            tenant_id: None,
            user_id: None,
            preferred_provider: None,
            deadline: None,
        }
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// What one successful `run` invocation hands back: the value plus the
/// usage the upstream reported, when it reported any. Streaming runs
/// return `usage: None` and account tokens when the stream completes.
pub struct AttemptSuccess<T> {
    pub value: T,
    pub usage: Option<Usage>,
}

/// One failed candidate attempt, for operator logs and diagnostics.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub provider_key: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Terminal routing failure with the enumerated attempts behind it.
#[derive(Debug, Clone)]
pub struct RouteError {
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: Vec<AttemptReport>,
}

impl RouteError {
    fn terminal(kind: ErrorKind, message: impl Into<String>, attempts: Vec<AttemptReport>) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts,
        }
    }
}

impl std::fmt::Display for RouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RouteError {}

/// Successful execution: the value plus which candidate produced it.
#[derive(Debug)]
pub struct ExecutionOutcome<T> {
    pub value: T,
    pub provider_key: String,
    pub canonical_id: String,
}

enum Tier {
    Preferred,
    Free,
    Paid,
    Emergency,
}

impl Tier {
    fn name(&self) -> &'static str {
        match self {
            Tier::Preferred => "preferred",
            Tier::Free => "free",
            Tier::Paid => "paid",
            Tier::Emergency => "emergency",
        }
    }
}

/// Drives candidates through the tiered fallback loop.
pub struct FallbackOrchestrator {
    router: Arc<SmartRouter>,
}

impl FallbackOrchestrator {
    pub fn new(router: Arc<SmartRouter>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &SmartRouter {
        &self.router
    }

    /// Execute `run` against candidates until one succeeds.
    ///
    /// `run` performs the actual provider invocation for one candidate and
    /// reports back through the closed error taxonomy. The orchestrator
    /// owns all health, quota and latency bookkeeping.
    pub async fn execute<T, F, Fut>(
        &self,
        request: &RouteRequest,
        run: F,
    ) -> Result<ExecutionOutcome<T>, RouteError>
    where
        F: Fn(EnrichedCandidate) -> Fut,
        Fut: Future<Output = Result<AttemptSuccess<T>, AdapterError>>,
    {
        let set = self
            .router
            .candidates(
                &request.model_id,
                request.endpoint_kind,
                &request.capabilities,
                request.tenant_id.as_deref(),
                request.user_id.as_deref(),
            )
            .map_err(|kind| {
                RouteError::terminal(kind, format!("no route for model {}", request.model_id), vec![])
            })?;
        if set.is_empty() {
            return Err(RouteError::terminal(
                ErrorKind::NotFound,
                format!("no providers bound for model {}", request.model_id),
                vec![],
            ));
        }

        let mut attempts: Vec<AttemptReport> = Vec::new();
        for tier in [Tier::Preferred, Tier::Free, Tier::Paid, Tier::Emergency] {
            let tier_candidates: Vec<EnrichedCandidate> = match &tier {
                Tier::Preferred => match &request.preferred_provider {
                    // A preferred key missing from routing output skips the
                    // tier, it is not an error
                    Some(key) => set
                        .eligible()
                        .filter(|c| &c.provider.key == key)
                        .cloned()
                        .collect(),
                    None => Vec::new(),
                },
                Tier::Free => set.eligible().filter(|c| c.is_free()).cloned().collect(),
                Tier::Paid => set.eligible().filter(|c| !c.is_free()).cloned().collect(),
                Tier::Emergency => set.all().to_vec(),
            };

            for candidate in tier_candidates {
                if request.expired() {
                    return Err(RouteError::terminal(
                        ErrorKind::Canceled,
                        "request deadline elapsed",
                        attempts,
                    ));
                }

                let key = candidate.provider.key.clone();
                // State may have moved while we were iterating
                if !self.router.health().is_healthy(&key) {
                    continue;
                }
                let ignore_quota = matches!(tier, Tier::Emergency);
                if !ignore_quota
                    && !self.router.quota().check_quota(&key, &candidate.quota_caps)
                {
                    continue;
                }
                if ignore_quota {
                    tracing::warn!(
                        provider = %key,
                        model = %candidate.canonical_id,
                        "emergency tier invocation: quota checks bypassed"
                    );
                }

                let canonical_id = candidate.canonical_id.clone();
                let started = Instant::now();
                match run(candidate).await {
                    Ok(success) => {
                        let latency_ms = started.elapsed().as_millis() as u64;
                        self.router.health().mark_success(&key);
                        self.router.costs().observe_latency(&key, latency_ms);
                        // Failed attempts never touch the quota window
                        self.router.quota().record_request(&key);
                        if let Some(usage) = success.usage {
                            self.router.quota().record_usage(
                                &key,
                                usage.prompt_tokens,
                                usage.completion_tokens,
                            );
                        }
                        tracing::info!(
                            provider = %key,
                            model = %canonical_id,
                            tier = tier.name(),
                            latency_ms,
                            "candidate succeeded"
                        );
                        return Ok(ExecutionOutcome {
                            value: success.value,
                            provider_key: key,
                            canonical_id,
                        });
                    }
                    Err(error) => {
                        tracing::warn!(
                            provider = %key,
                            model = %canonical_id,
                            tier = tier.name(),
                            kind = %error.kind,
                            message = %error.message,
                            "candidate attempt failed"
                        );
                        match error.kind {
                            ErrorKind::Canceled => {
                                return Err(RouteError::terminal(
                                    ErrorKind::Canceled,
                                    error.message,
                                    attempts,
                                ));
                            }
                            kind if kind.is_client_fault() => {
                                // Client-side fault: surface as-is, the
                                // provider did nothing wrong
                                return Err(RouteError::terminal(kind, error.message, attempts));
                            }
                            ErrorKind::RateLimited | ErrorKind::QuotaExhausted => {
                                self.router.health().mark_failure(
                                    &key,
                                    RATE_LIMIT_COOLDOWN,
                                    &error.message,
                                );
                            }
                            _ => {
                                self.router.health().mark_failure(
                                    &key,
                                    TRANSIENT_COOLDOWN,
                                    &error.message,
                                );
                            }
                        }
                        attempts.push(AttemptReport {
                            provider_key: key,
                            kind: error.kind,
                            message: error.message,
                        });
                    }
                }
            }
        }

        tracing::error!(
            model = %request.model_id,
            attempts = attempts.len(),
            "all fallback tiers exhausted"
        );
        Err(RouteError::terminal(
            ErrorKind::UpstreamUnavailable,
            "all candidate providers failed",
            attempts,
        ))
    }
}
