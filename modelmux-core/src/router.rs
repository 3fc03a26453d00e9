//! # Smart Router
//!
//! Produces the ordered candidate list the fallback orchestrator executes
//! against. One call resolves the model against a single registry snapshot,
//! enriches every binding with health, quota, cost and latency signals,
//! scores it under the merged policy, and orders the result free-first,
//! score-descending, tier-ascending.
//!
//! Candidates that fail the health or quota filter stay in the set with
//! `eligible = false`: the preferred/free/paid tiers only see eligible
//! candidates, while the emergency tier may reach for the rest.

use crate::costs::{CostProjection, CostView};
use crate::error::ErrorKind;
use crate::health::HealthStore;
use crate::policy::PolicyStore;
use crate::quota::{QuotaCaps, QuotaTracker};
use crate::registry::{
    CapabilitySet, EndpointKind, ModelRegistry, ProviderDefinition, ProviderModelBinding,
};
use crate::resolver;
use crate::scoring::{score_candidate, CandidateSignals};
use std::cmp::Ordering;
use std::sync::Arc;

/// One scored, fully-enriched routing candidate.
#[derive(Debug, Clone)]
pub struct EnrichedCandidate {
    pub canonical_id: String,
    pub provider: ProviderDefinition,
    pub binding: ProviderModelBinding,
    pub cost: CostProjection,
    pub quota_caps: QuotaCaps,
    pub score: f64,
    /// Provider passed the health check at enrichment time
    pub healthy: bool,
    /// Provider passed the quota check at enrichment time
    pub under_quota: bool,
}

impl EnrichedCandidate {
    pub fn is_free(&self) -> bool {
        self.cost.free_tier
    }

    /// Eligible for the normal fallback tiers.
    pub fn eligible(&self) -> bool {
        self.healthy && self.under_quota
    }
}

/// The router's output: every surviving candidate in final order.
#[derive(Debug, Clone)]
pub struct CandidateSet {
    pub canonical_id: String,
    candidates: Vec<EnrichedCandidate>,
}

impl CandidateSet {
    /// Candidates that passed health and quota filters, in routing order.
    pub fn eligible(&self) -> impl Iterator<Item = &EnrichedCandidate> {
        self.candidates.iter().filter(|c| c.eligible())
    }

    /// Every candidate, eligible or not, in routing order. The emergency
    /// tier walks this list.
    pub fn all(&self) -> &[EnrichedCandidate] {
        &self.candidates
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Effective quota caps for a binding: binding-level limits win, then the
/// provider defaults.
pub fn effective_caps(
    provider: &ProviderDefinition,
    binding: &ProviderModelBinding,
) -> QuotaCaps {
    QuotaCaps {
        requests_per_minute: binding.rate_limit_rpm.or(provider.default_rpm),
        tokens_per_minute: binding.rate_limit_tpm.or(provider.default_tpm),
    }
}

/// Filter, enrich, score and order candidates for one request.
pub struct SmartRouter {
    registry: Arc<ModelRegistry>,
    health: Arc<HealthStore>,
    quota: Arc<QuotaTracker>,
    costs: Arc<CostView>,
    policies: Arc<PolicyStore>,
}

impl SmartRouter {
    pub fn new(
        registry: Arc<ModelRegistry>,
        health: Arc<HealthStore>,
        quota: Arc<QuotaTracker>,
        costs: Arc<CostView>,
        policies: Arc<PolicyStore>,
    ) -> Self {
        Self {
            registry,
            health,
            quota,
            costs,
            policies,
        }
    }

    pub fn health(&self) -> &HealthStore {
        &self.health
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub fn costs(&self) -> &CostView {
        &self.costs
    }

    /// Resolve and rank candidates for `model_id`.
    ///
    /// Returns `ErrorKind::NotFound` when no canonical model (with at least
    /// one enabled binding) matches the id and capabilities. All enrichment
    /// happens against one registry snapshot.
    pub fn candidates(
        &self,
        model_id: &str,
        endpoint_kind: EndpointKind,
        capabilities: &CapabilitySet,
        tenant_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<CandidateSet, ErrorKind> {
        let snapshot = self.registry.snapshot();
        let resolution =
            resolver::resolve(&snapshot, model_id, endpoint_kind, capabilities, tenant_id)
                .ok_or(ErrorKind::NotFound)?;

        let policy = self.policies.merged(tenant_id, user_id);
        let mut candidates: Vec<EnrichedCandidate> = Vec::new();

        for binding in resolution.bindings {
            // Resolution already dropped unknown providers
            let Some(provider) = snapshot.provider(&binding.provider_key).cloned() else {
                continue;
            };
            let caps = effective_caps(&provider, &binding);
            let healthy = self.health.is_healthy(&provider.key);
            let under_quota = self.quota.check_quota(&provider.key, &caps);
            let cost = self.costs.cost_of(&provider, &binding);

            let requests_in_window = self.quota.requests_in_window(&provider.key);
            let estimated_quota_remaining = match caps.requests_per_minute {
                Some(rpm) if rpm > 0 => {
                    100.0 * (1.0 - f64::from(requests_in_window.min(rpm)) / f64::from(rpm))
                }
                _ => 100.0,
            };
            let signals = CandidateSignals {
                quality: self.costs.quality_of(&provider.key, &resolution.canonical_id),
                estimated_quota_remaining,
                requests_in_window,
                rate_limit_rpm: caps.requests_per_minute,
                ema_latency_ms: self.costs.latency_of(&provider.key),
                price_per_token: cost.price_per_token(),
                is_free: cost.free_tier,
            };
            let score = score_candidate(&policy, &signals);
            if score < policy.min_score_threshold {
                tracing::debug!(
                    provider = %provider.key,
                    score,
                    threshold = policy.min_score_threshold,
                    "candidate dropped below score threshold"
                );
                continue;
            }

            candidates.push(EnrichedCandidate {
                canonical_id: resolution.canonical_id.clone(),
                provider,
                binding,
                cost,
                quota_caps: caps,
                score,
                healthy,
                under_quota,
            });
        }

        // Free first, then score descending, then tier ascending
        candidates.sort_by(|a, b| {
            b.is_free()
                .cmp(&a.is_free())
                .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
                .then_with(|| a.provider.tier.cmp(&b.provider.tier))
        });

        Ok(CandidateSet {
            canonical_id: resolution.canonical_id,
            candidates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::costs::{PriceTable, QualityTable};
    use crate::registry::{
        Alias, AliasScope, CanonicalModel, ProviderKind, RegistrySnapshot,
    };
    use std::time::Duration;

    fn model(id: &str) -> CanonicalModel {
        CanonicalModel {
            id: id.to_string(),
            family: "chat".to_string(),
            context_window: 64_000,
            max_output_tokens: 8192,
            capabilities: CapabilitySet::new(),
            release_date: None,
        }
    }

    fn provider(key: &str, free: bool, tier: i32) -> ProviderDefinition {
        ProviderDefinition {
            key: key.to_string(),
            kind: ProviderKind::OpenaiCompatible,
            base_endpoint: "https://api.example.com/v1".to_string(),
            fallback_endpoint: None,
            tier,
            enabled: true,
            free,
            credential_ref: "c".to_string(),
            default_rpm: Some(60),
            default_tpm: None,
        }
    }

    fn binding(model: &str, provider: &str) -> ProviderModelBinding {
        ProviderModelBinding {
            canonical_id: model.to_string(),
            provider_key: provider.to_string(),
            provider_specific_id: model.to_string(),
            available: true,
            override_input_price: None,
            override_output_price: None,
            rate_limit_rpm: None,
            rate_limit_tpm: None,
            free_tier: false,
        }
    }

    fn router() -> SmartRouter {
        let snapshot = RegistrySnapshot::build(
            vec![model("deepseek-chat")],
            vec![
                provider("deepseek", false, 1),
                provider("openrouter", true, 2),
            ],
            vec![
                binding("deepseek-chat", "deepseek"),
                binding("deepseek-chat", "openrouter"),
            ],
            vec![Alias {
                scope: AliasScope::Global,
                tenant_id: None,
                name: "default".to_string(),
                candidates: vec!["deepseek-chat".to_string()],
            }],
        );
        SmartRouter::new(
            Arc::new(ModelRegistry::new(snapshot)),
            Arc::new(HealthStore::new()),
            Arc::new(QuotaTracker::new()),
            Arc::new(CostView::new(PriceTable::new(), QualityTable::new())),
            Arc::new(PolicyStore::default()),
        )
    }

    #[test]
    fn free_provider_orders_first() {
        let router = router();
        let set = router
            .candidates(
                "deepseek-chat",
                EndpointKind::ChatCompletions,
                &CapabilitySet::new(),
                None,
                None,
            )
            .unwrap();
        let order: Vec<&str> = set
            .eligible()
            .map(|c| c.provider.key.as_str())
            .collect();
        assert_eq!(order, vec!["openrouter", "deepseek"]);
    }

    #[test]
    fn every_candidate_has_an_enabled_provider_binding() {
        let router = router();
        let set = router
            .candidates(
                "deepseek-chat",
                EndpointKind::ChatCompletions,
                &CapabilitySet::new(),
                None,
                None,
            )
            .unwrap();
        let snapshot = router.registry.snapshot();
        for candidate in set.all() {
            let provider = snapshot.provider(&candidate.provider.key).unwrap();
            assert!(provider.enabled);
            assert!(snapshot
                .bindings_for(&candidate.canonical_id)
                .iter()
                .any(|b| b.provider_key == candidate.provider.key));
        }
    }

    #[test]
    fn unhealthy_provider_is_ineligible_but_kept_for_emergencies() {
        let router = router();
        router
            .health()
            .mark_failure("openrouter", Duration::from_secs(30), "429");
        let set = router
            .candidates(
                "deepseek-chat",
                EndpointKind::ChatCompletions,
                &CapabilitySet::new(),
                None,
                None,
            )
            .unwrap();
        let eligible: Vec<&str> = set.eligible().map(|c| c.provider.key.as_str()).collect();
        assert_eq!(eligible, vec!["deepseek"]);
        assert_eq!(set.all().len(), 2);
    }

    #[test]
    fn unknown_model_is_not_found() {
        let router = router();
        let err = router
            .candidates(
                "nonexistent",
                EndpointKind::ChatCompletions,
                &CapabilitySet::new(),
                None,
                None,
            )
            .unwrap_err();
        assert_eq!(err, ErrorKind::NotFound);
    }

    #[test]
    fn alias_resolution_flows_through_routing() {
        let router = router();
        let set = router
            .candidates(
                "default",
                EndpointKind::ChatCompletions,
                &CapabilitySet::new(),
                None,
                None,
            )
            .unwrap();
        assert_eq!(set.canonical_id, "deepseek-chat");
    }
}
