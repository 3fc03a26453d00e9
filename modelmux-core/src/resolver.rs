//! # Model Resolver
//!
//! Turns a client-supplied model identifier into a canonical model plus its
//! enabled bindings, against one registry snapshot. Resolution order:
//! tenant alias, then global alias, then the literal id. Multi-candidate
//! aliases (combos) contribute their candidates in definition order, and
//! the first candidate that matches capabilities and has at least one
//! enabled, available binding wins.

use crate::registry::{CapabilitySet, EndpointKind, ProviderModelBinding, RegistrySnapshot};

/// Successful resolution: one canonical model and its usable bindings.
#[derive(Debug, Clone)]
pub struct ResolutionResult {
    pub canonical_id: String,
    pub bindings: Vec<ProviderModelBinding>,
}

/// Resolve a model id to a canonical model and candidate bindings.
///
/// Returns `None` when nothing matches; the caller decides the error kind.
pub fn resolve(
    snapshot: &RegistrySnapshot,
    model_id: &str,
    endpoint_kind: EndpointKind,
    capabilities: &CapabilitySet,
    tenant_id: Option<&str>,
) -> Option<ResolutionResult> {
    let mut candidates = snapshot.resolve_alias(model_id, tenant_id);
    // The literal id is always the last candidate, unless the alias already
    // lists it.
    if !candidates.iter().any(|c| c == model_id) {
        candidates.push(model_id.to_string());
    }

    for canonical_id in candidates {
        let Some(model) = snapshot.lookup_canonical(&canonical_id) else {
            continue;
        };
        if !model.capabilities.satisfies(capabilities) {
            tracing::debug!(
                model = %canonical_id,
                endpoint = endpoint_kind.as_str(),
                "candidate skipped: capability mismatch"
            );
            continue;
        }
        let bindings: Vec<ProviderModelBinding> = snapshot
            .bindings_for(&canonical_id)
            .iter()
            .filter(|b| {
                b.available
                    && snapshot
                        .provider(&b.provider_key)
                        .map(|p| p.enabled)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        if !bindings.is_empty() {
            return Some(ResolutionResult {
                canonical_id,
                bindings,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{
        Alias, AliasScope, CanonicalModel, Capability, ProviderDefinition, ProviderKind,
    };

    fn model(id: &str, caps: &[Capability]) -> CanonicalModel {
        CanonicalModel {
            id: id.to_string(),
            family: "test".to_string(),
            context_window: 32_000,
            max_output_tokens: 4096,
            capabilities: caps.iter().copied().collect(),
            release_date: None,
        }
    }

    fn provider(key: &str, enabled: bool) -> ProviderDefinition {
        ProviderDefinition {
            key: key.to_string(),
            kind: ProviderKind::OpenaiCompatible,
            base_endpoint: "https://api.example.com/v1".to_string(),
            fallback_endpoint: None,
            tier: 1,
            enabled,
            free: false,
            credential_ref: "c".to_string(),
            default_rpm: None,
            default_tpm: None,
        }
    }

    fn binding(model: &str, provider: &str, available: bool) -> ProviderModelBinding {
        ProviderModelBinding {
            canonical_id: model.to_string(),
            provider_key: provider.to_string(),
            provider_specific_id: model.to_string(),
            available,
            override_input_price: None,
            override_output_price: None,
            rate_limit_rpm: None,
            rate_limit_tpm: None,
            free_tier: false,
        }
    }

    fn snapshot() -> RegistrySnapshot {
        RegistrySnapshot::build(
            vec![
                model("deepseek-chat", &[Capability::Streaming, Capability::Tools]),
                model("llama-3.1-70b", &[Capability::Streaming]),
                model("orphan-model", &[]),
            ],
            vec![
                provider("deepseek", true),
                provider("openrouter", true),
                provider("disabled-lab", false),
            ],
            vec![
                binding("deepseek-chat", "deepseek", true),
                binding("deepseek-chat", "openrouter", true),
                binding("llama-3.1-70b", "openrouter", true),
                binding("orphan-model", "disabled-lab", true),
            ],
            vec![
                Alias {
                    scope: AliasScope::Global,
                    tenant_id: None,
                    name: "best-chat".to_string(),
                    candidates: vec![
                        "orphan-model".to_string(),
                        "deepseek-chat".to_string(),
                    ],
                },
                Alias {
                    scope: AliasScope::Tenant,
                    tenant_id: Some("acme".to_string()),
                    name: "best-chat".to_string(),
                    candidates: vec!["llama-3.1-70b".to_string()],
                },
            ],
        )
    }

    #[test]
    fn literal_id_resolves_to_itself() {
        let snap = snapshot();
        let result = resolve(
            &snap,
            "deepseek-chat",
            EndpointKind::ChatCompletions,
            &CapabilitySet::new(),
            None,
        )
        .unwrap();
        assert_eq!(result.canonical_id, "deepseek-chat");
        assert_eq!(result.bindings.len(), 2);
    }

    #[test]
    fn alias_on_canonical_is_identity_on_canonical_ids() {
        let snap = snapshot();
        let via_alias = resolve(
            &snap,
            "best-chat",
            EndpointKind::ChatCompletions,
            &CapabilitySet::new(),
            None,
        )
        .unwrap();
        let direct = resolve(
            &snap,
            &via_alias.canonical_id,
            EndpointKind::ChatCompletions,
            &CapabilitySet::new(),
            None,
        )
        .unwrap();
        assert_eq!(via_alias.canonical_id, direct.canonical_id);
    }

    #[test]
    fn combo_skips_candidates_without_enabled_bindings() {
        // "best-chat" lists orphan-model first, but its only binding sits on
        // a disabled provider, so resolution falls through to deepseek-chat.
        let snap = snapshot();
        let result = resolve(
            &snap,
            "best-chat",
            EndpointKind::ChatCompletions,
            &CapabilitySet::new(),
            None,
        )
        .unwrap();
        assert_eq!(result.canonical_id, "deepseek-chat");
    }

    #[test]
    fn tenant_alias_takes_precedence() {
        let snap = snapshot();
        let result = resolve(
            &snap,
            "best-chat",
            EndpointKind::ChatCompletions,
            &CapabilitySet::new(),
            Some("acme"),
        )
        .unwrap();
        assert_eq!(result.canonical_id, "llama-3.1-70b");
    }

    #[test]
    fn capability_mismatch_skips_the_candidate() {
        let snap = snapshot();
        let needs_tools: CapabilitySet = [Capability::Tools].into_iter().collect();
        // llama has no tools capability, so the tenant alias candidate is
        // skipped and the literal name fails too (it is not canonical).
        assert!(resolve(
            &snap,
            "best-chat",
            EndpointKind::ChatCompletions,
            &needs_tools,
            Some("acme"),
        )
        .is_none());
    }

    #[test]
    fn unknown_model_resolves_to_none() {
        let snap = snapshot();
        assert!(resolve(
            &snap,
            "nonexistent",
            EndpointKind::ChatCompletions,
            &CapabilitySet::new(),
            None,
        )
        .is_none());
    }
}
