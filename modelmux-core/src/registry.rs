//! # Model Registry
//!
//! The read-mostly index of canonical models, provider definitions, bindings
//! and aliases. A [`RegistrySnapshot`] is immutable once built; the
//! [`ModelRegistry`] hands out `Arc` clones of the current snapshot and
//! swaps in a replacement atomically when configuration changes. A single
//! resolution always sees one snapshot; concurrent updates become visible on
//! the next lookup.
//!
//! ## Overview
//!
//! - **CanonicalModel**: the gateway-stable identity of a model, with the
//!   minimum capability set a binding must offer
//! - **ProviderDefinition**: one upstream service (endpoint, kind, tier,
//!   free flag, credential reference)
//! - **ProviderModelBinding**: canonical model × provider → the model string
//!   sent on the wire, plus per-binding price and rate-limit overrides
//! - **Alias**: `(scope, name)` → ordered canonical-id candidates; tenant
//!   aliases shadow global ones; a multi-candidate alias is a combo

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// Model capabilities a canonical model can declare and a request can demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Streaming,
    Tools,
    Vision,
    StructuredOutput,
    LogProbs,
    Audio,
    Reasoning,
}

/// A set of capabilities with superset matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(pub HashSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// True iff `self` offers everything `required` demands.
    pub fn satisfies(&self, required: &CapabilitySet) -> bool {
        required.0.is_subset(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Which OpenAI-compatible surface a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    ChatCompletions,
    Completions,
    Responses,
    Embeddings,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::ChatCompletions => "chat_completions",
            EndpointKind::Completions => "completions",
            EndpointKind::Responses => "responses",
            EndpointKind::Embeddings => "embeddings",
        }
    }
}

/// The gateway-stable identity of a model, independent of which upstream
/// serves it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalModel {
    /// Stable id matching `[a-z0-9][a-z0-9._-]*`
    pub id: String,
    pub family: String,
    pub context_window: u32,
    pub max_output_tokens: u32,
    /// Minimum capabilities a binding must offer to be a candidate
    #[serde(default)]
    pub capabilities: CapabilitySet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<chrono::NaiveDate>,
}

/// Validate a canonical model id: `[a-z0-9][a-z0-9._-]*`.
pub fn valid_canonical_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
}

/// Upstream wire dialect spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    OpenaiCompatible,
    AnthropicStyle,
    CloudflareAi,
    Gemini,
    Generic,
}

/// One upstream AI service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDefinition {
    pub key: String,
    pub kind: ProviderKind,
    pub base_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_endpoint: Option<String>,
    /// Lower tier is preferred
    #[serde(default)]
    pub tier: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub free: bool,
    /// Opaque handle resolved by the credential store
    pub credential_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_rpm: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_tpm: Option<u32>,
}

fn default_true() -> bool {
    true
}

/// Canonical model × provider → the identifier sent on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderModelBinding {
    pub canonical_id: String,
    pub provider_key: String,
    pub provider_specific_id: String,
    #[serde(default = "default_true")]
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_input_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_output_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_rpm: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_tpm: Option<u32>,
    /// Free at the binding level even when the provider is paid
    #[serde(default)]
    pub free_tier: bool,
}

/// Alias scope: tenant aliases shadow global ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasScope {
    Global,
    Tenant,
}

/// `(scope, name)` → ordered canonical-id candidates. Order is significant:
/// the resolver tries candidates first to last.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alias {
    pub scope: AliasScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub name: String,
    pub candidates: Vec<String>,
}

/// An immutable, internally-consistent view of the whole catalog.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    models: HashMap<String, CanonicalModel>,
    providers: HashMap<String, ProviderDefinition>,
    bindings_by_model: HashMap<String, Vec<ProviderModelBinding>>,
    global_aliases: HashMap<String, Vec<String>>,
    tenant_aliases: HashMap<(String, String), Vec<String>>,
}

impl RegistrySnapshot {
    /// Build a snapshot, dropping bindings whose model or provider is
    /// missing so the invariant "every binding resolves" holds by
    /// construction.
    pub fn build(
        models: Vec<CanonicalModel>,
        providers: Vec<ProviderDefinition>,
        bindings: Vec<ProviderModelBinding>,
        aliases: Vec<Alias>,
    ) -> Self {
        let models: HashMap<_, _> = models
            .into_iter()
            .filter(|m| valid_canonical_id(&m.id))
            .map(|m| (m.id.clone(), m))
            .collect();
        let providers: HashMap<_, _> =
            providers.into_iter().map(|p| (p.key.clone(), p)).collect();

        let mut bindings_by_model: HashMap<String, Vec<ProviderModelBinding>> = HashMap::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        for binding in bindings {
            if !models.contains_key(&binding.canonical_id)
                || !providers.contains_key(&binding.provider_key)
            {
                tracing::warn!(
                    canonical_id = %binding.canonical_id,
                    provider = %binding.provider_key,
                    "dropping binding with unknown model or provider"
                );
                continue;
            }
            // (canonical_id, provider_key) is unique; first definition wins
            if !seen.insert((binding.canonical_id.clone(), binding.provider_key.clone())) {
                continue;
            }
            bindings_by_model
                .entry(binding.canonical_id.clone())
                .or_default()
                .push(binding);
        }

        let mut global_aliases = HashMap::new();
        let mut tenant_aliases = HashMap::new();
        for alias in aliases {
            match alias.scope {
                AliasScope::Global => {
                    global_aliases.insert(alias.name, alias.candidates);
                }
                AliasScope::Tenant => {
                    if let Some(tenant) = alias.tenant_id {
                        tenant_aliases.insert((tenant, alias.name), alias.candidates);
                    }
                }
            }
        }

        Self {
            models,
            providers,
            bindings_by_model,
            global_aliases,
            tenant_aliases,
        }
    }

    pub fn lookup_canonical(&self, id: &str) -> Option<&CanonicalModel> {
        self.models.get(id)
    }

    pub fn provider(&self, key: &str) -> Option<&ProviderDefinition> {
        self.providers.get(key)
    }

    /// Ordered canonical-id candidates for an alias name, tenant scope
    /// shadowing global. Empty when the name is not an alias.
    pub fn resolve_alias(&self, name: &str, tenant_id: Option<&str>) -> Vec<String> {
        if let Some(tenant) = tenant_id {
            if let Some(candidates) = self
                .tenant_aliases
                .get(&(tenant.to_string(), name.to_string()))
            {
                return candidates.clone();
            }
        }
        self.global_aliases.get(name).cloned().unwrap_or_default()
    }

    /// Bindings for a canonical model. Order is not guaranteed here; the
    /// scorer orders candidates.
    pub fn bindings_for(&self, canonical_id: &str) -> &[ProviderModelBinding] {
        self.bindings_by_model
            .get(canonical_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// True iff the canonical model's capability set covers `required`.
    pub fn capability_match(&self, canonical_id: &str, required: &CapabilitySet) -> bool {
        self.models
            .get(canonical_id)
            .map(|m| m.capabilities.satisfies(required))
            .unwrap_or(false)
    }

    /// All canonical models, for the model listing endpoint.
    pub fn canonical_models(&self) -> impl Iterator<Item = &CanonicalModel> {
        self.models.values()
    }

    /// Globally visible alias names and their candidate lists.
    pub fn global_aliases(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.global_aliases.iter()
    }
}

/// Source of fresh registry snapshots, implemented by the configuration
/// layer. The registry consumes snapshots; it never reads config itself.
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> RegistrySnapshot;
}

/// Concurrent-read registry with atomic snapshot replacement.
///
/// Readers clone an `Arc` to the current snapshot and keep using it for the
/// whole resolution; writers build a new snapshot off to the side and swap
/// the pointer.
#[derive(Debug)]
pub struct ModelRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl ModelRegistry {
    pub fn new(snapshot: RegistrySnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The snapshot to use for one whole resolution.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Swap in a replacement snapshot. In-flight resolutions keep their old
    /// snapshot; the next `snapshot()` call sees the new one.
    pub fn replace(&self, snapshot: RegistrySnapshot) {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(snapshot);
    }

    pub fn refresh_from(&self, source: &dyn SnapshotSource) {
        self.replace(source.snapshot());
    }
}
