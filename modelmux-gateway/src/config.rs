//! # Gateway Configuration
//!
//! TOML-based configuration for the gateway: server binding, upstream
//! providers, the canonical model catalog with per-provider bindings,
//! aliases, scoring policy with tenant/user override tables, timeouts,
//! deduplication and authentication. Environment variables prefixed
//! `MODELMUX_` override selected fields at load time, and the whole
//! configuration is validated before the server starts.
//!
//! ## Example
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3000
//!
//! [providers.openrouter]
//! kind = "openai-compatible"
//! endpoint = "https://openrouter.ai/api/v1"
//! tier = 2
//! free = true
//! credential_ref = "openrouter-key"
//!
//! [[canonical_models]]
//! id = "deepseek-chat"
//! family = "deepseek"
//! context_window = 65536
//! max_output_tokens = 8192
//! capabilities = ["streaming", "tools"]
//!
//! [[canonical_models.bindings]]
//! provider_key = "openrouter"
//! provider_specific_id = "deepseek/deepseek-chat"
//!
//! [[aliases]]
//! scope = "global"
//! name = "default"
//! candidates = ["deepseek-chat"]
//!
//! [credentials]
//! openrouter-key = "sk-or-..."
//! ```

use modelmux_core::costs::{PriceTable, QualityTable};
use modelmux_core::policy::PolicyStore;
use modelmux_core::registry::{
    valid_canonical_id, Alias, CanonicalModel, CapabilitySet, ProviderDefinition, ProviderKind,
    ProviderModelBinding, RegistrySnapshot, SnapshotSource,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Root configuration for the gateway process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,
    #[serde(default)]
    pub canonical_models: Vec<CanonicalModelConfig>,
    #[serde(default)]
    pub aliases: Vec<Alias>,
    #[serde(default)]
    pub policy: PolicyStore,
    #[serde(default)]
    pub pricing: HashMap<String, PriceEntry>,
    #[serde(default)]
    pub credentials: HashMap<String, String>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            max_body_size: default_max_body_size(),
        }
    }
}

/// One upstream provider as written in configuration; the key comes from
/// the TOML table name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub kind: ProviderKind,
    pub endpoint: String,
    #[serde(default)]
    pub fallback_endpoint: Option<String>,
    #[serde(default)]
    pub tier: i32,
    #[serde(default)]
    pub free: bool,
    pub credential_ref: String,
    #[serde(default)]
    pub default_rpm: Option<u32>,
    #[serde(default)]
    pub default_tpm: Option<u32>,
}

fn default_true() -> bool {
    true
}

/// Canonical model plus its provider bindings, as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalModelConfig {
    pub id: String,
    pub family: String,
    pub context_window: u32,
    pub max_output_tokens: u32,
    #[serde(default)]
    pub capabilities: CapabilitySet,
    #[serde(default)]
    pub release_date: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingConfig {
    pub provider_key: String,
    pub provider_specific_id: String,
    #[serde(default = "default_true")]
    pub available: bool,
    #[serde(default)]
    pub override_input_price: Option<f64>,
    #[serde(default)]
    pub override_output_price: Option<f64>,
    #[serde(default)]
    pub rate_limit_rpm: Option<u32>,
    #[serde(default)]
    pub rate_limit_tpm: Option<u32>,
    #[serde(default)]
    pub free_tier: bool,
    /// Quality score 1..=10 for this (provider, model) pair
    #[serde(default)]
    pub quality: Option<f64>,
}

/// Default pricing for a `provider/model` pair, USD per token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceEntry {
    pub input: f64,
    pub output: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Overall non-streaming request deadline
    #[serde(default = "default_request_ms")]
    pub request_ms: u64,
    /// Idle-read timeout between stream frames
    #[serde(default = "default_stream_idle_ms")]
    pub stream_idle_ms: u64,
    /// Per-candidate attempt timeout for non-streaming calls
    #[serde(default = "default_per_attempt_ms")]
    pub per_attempt_ms: u64,
}

fn default_request_ms() -> u64 {
    600_000
}

fn default_stream_idle_ms() -> u64 {
    60_000
}

fn default_per_attempt_ms() -> u64 {
    30_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: default_request_ms(),
            stream_idle_ms: default_stream_idle_ms(),
            per_attempt_ms: default_per_attempt_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn stream_idle(&self) -> Duration {
        Duration::from_millis(self.stream_idle_ms)
    }

    pub fn per_attempt(&self) -> Duration {
        Duration::from_millis(self.per_attempt_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// In-flight lock lifetime; joiners give up and run directly after this
    #[serde(default = "default_dedup_ttl_ms")]
    pub ttl_ms: u64,
    /// Joiner poll interval
    #[serde(default = "default_dedup_poll_ms")]
    pub poll_ms: u64,
    /// How long completed results stay readable
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,
    /// Coordination substrate; absent means in-process only
    #[serde(default)]
    pub redis_url: Option<String>,
}

fn default_dedup_ttl_ms() -> u64 {
    30_000
}

fn default_dedup_poll_ms() -> u64 {
    100
}

fn default_result_ttl_secs() -> u64 {
    300
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: default_dedup_ttl_ms(),
            poll_ms: default_dedup_poll_ms(),
            result_ttl_secs: default_result_ttl_secs(),
            redis_url: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    /// HS256 secret for JWT bearer tokens
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default)]
    pub api_keys: Vec<ApiKeyEntry>,
}

/// One opaque API key and the principal it authenticates as.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyEntry {
    pub key: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides for deployment knobs and secrets.
    ///
    /// `MODELMUX_HOST`, `MODELMUX_PORT`, `MODELMUX_LOG_LEVEL`,
    /// `MODELMUX_REDIS_URL`, `MODELMUX_JWT_SECRET`, and
    /// `MODELMUX_CREDENTIAL_<REF>` (dashes as underscores) for provider
    /// secrets.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = env::var("MODELMUX_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("MODELMUX_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(level) = env::var("MODELMUX_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(url) = env::var("MODELMUX_REDIS_URL") {
            self.dedup.redis_url = Some(url);
        }
        if let Ok(secret) = env::var("MODELMUX_JWT_SECRET") {
            self.auth.jwt_secret = Some(secret);
        }
        for settings in self.providers.values() {
            let var = format!(
                "MODELMUX_CREDENTIAL_{}",
                settings.credential_ref.to_uppercase().replace('-', "_")
            );
            if let Ok(secret) = env::var(&var) {
                self.credentials
                    .insert(settings.credential_ref.clone(), secret);
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.host.is_empty() {
            anyhow::bail!("server host cannot be empty");
        }
        if self.server.port == 0 {
            anyhow::bail!("server port must be between 1 and 65535");
        }

        for (key, settings) in &self.providers {
            if !settings.endpoint.starts_with("http://")
                && !settings.endpoint.starts_with("https://")
            {
                anyhow::bail!("invalid endpoint for provider {key}: {}", settings.endpoint);
            }
            if settings.credential_ref.is_empty() {
                anyhow::bail!("provider {key} has an empty credential_ref");
            }
        }

        for model in &self.canonical_models {
            if !valid_canonical_id(&model.id) {
                anyhow::bail!("invalid canonical model id: {}", model.id);
            }
            for binding in &model.bindings {
                if !self.providers.contains_key(&binding.provider_key) {
                    anyhow::bail!(
                        "binding for {} references unknown provider {}",
                        model.id,
                        binding.provider_key
                    );
                }
                if let Some(quality) = binding.quality {
                    if !(1.0..=10.0).contains(&quality) {
                        anyhow::bail!(
                            "quality for {}/{} must be in 1..=10",
                            binding.provider_key,
                            model.id
                        );
                    }
                }
            }
        }

        for alias in &self.aliases {
            if alias.candidates.is_empty() {
                anyhow::bail!("alias {} has no candidates", alias.name);
            }
        }

        self.policy
            .global
            .weights
            .validate()
            .map_err(|e| anyhow::anyhow!(e))?;

        if self.auth.enabled && self.auth.jwt_secret.is_none() && self.auth.api_keys.is_empty() {
            anyhow::bail!("auth is enabled but neither jwt_secret nor api_keys are configured");
        }

        Ok(())
    }

    /// Provider definitions in the core's shape, keyed as configured.
    pub fn provider_definitions(&self) -> Vec<ProviderDefinition> {
        self.providers
            .iter()
            .map(|(key, settings)| ProviderDefinition {
                key: key.clone(),
                kind: settings.kind,
                base_endpoint: settings.endpoint.clone(),
                fallback_endpoint: settings.fallback_endpoint.clone(),
                tier: settings.tier,
                enabled: settings.enabled,
                free: settings.free,
                credential_ref: settings.credential_ref.clone(),
                default_rpm: settings.default_rpm,
                default_tpm: settings.default_tpm,
            })
            .collect()
    }

    pub fn price_table(&self) -> PriceTable {
        self.pricing
            .iter()
            .map(|(key, entry)| (key.clone(), (entry.input, entry.output)))
            .collect()
    }

    pub fn quality_table(&self) -> QualityTable {
        let mut table = QualityTable::new();
        for model in &self.canonical_models {
            for binding in &model.bindings {
                if let Some(quality) = binding.quality {
                    table.insert(format!("{}/{}", binding.provider_key, model.id), quality);
                }
            }
        }
        table
    }
}

impl SnapshotSource for Config {
    fn snapshot(&self) -> RegistrySnapshot {
        let models: Vec<CanonicalModel> = self
            .canonical_models
            .iter()
            .map(|m| CanonicalModel {
                id: m.id.clone(),
                family: m.family.clone(),
                context_window: m.context_window,
                max_output_tokens: m.max_output_tokens,
                capabilities: m.capabilities.clone(),
                release_date: m.release_date,
            })
            .collect();
        let bindings: Vec<ProviderModelBinding> = self
            .canonical_models
            .iter()
            .flat_map(|m| {
                m.bindings.iter().map(|b| ProviderModelBinding {
                    canonical_id: m.id.clone(),
                    provider_key: b.provider_key.clone(),
                    provider_specific_id: b.provider_specific_id.clone(),
                    available: b.available,
                    override_input_price: b.override_input_price,
                    override_output_price: b.override_output_price,
                    rate_limit_rpm: b.rate_limit_rpm,
                    rate_limit_tpm: b.rate_limit_tpm,
                    free_tier: b.free_tier,
                })
            })
            .collect();
        RegistrySnapshot::build(
            models,
            self.provider_definitions(),
            bindings,
            self.aliases.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [server]
        host = "127.0.0.1"
        port = 3000

        [providers.deepseek]
        kind = "openai-compatible"
        endpoint = "https://api.deepseek.com/v1"
        tier = 1
        credential_ref = "deepseek-key"

        [providers.openrouter]
        kind = "openai-compatible"
        endpoint = "https://openrouter.ai/api/v1"
        tier = 2
        free = true
        credential_ref = "openrouter-key"

        [[canonical_models]]
        id = "deepseek-chat"
        family = "deepseek"
        context_window = 65536
        max_output_tokens = 8192
        capabilities = ["streaming", "tools"]

        [[canonical_models.bindings]]
        provider_key = "deepseek"
        provider_specific_id = "deepseek-chat"
        quality = 8.0

        [[canonical_models.bindings]]
        provider_key = "openrouter"
        provider_specific_id = "deepseek/deepseek-chat"

        [[aliases]]
        scope = "global"
        name = "default"
        candidates = ["deepseek-chat"]

        [pricing."deepseek/deepseek-chat"]
        input = 0.00000027
        output = 0.0000011

        [credentials]
        deepseek-key = "sk-test"
        openrouter-key = "sk-or-test"

        [auth]
        enabled = true

        [[auth.api_keys]]
        key = "mk-local-dev"
        name = "local"
        tenant_id = "acme"
    "#;

    #[test]
    fn sample_config_parses_and_validates() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.canonical_models.len(), 1);
        assert!(config.dedup.enabled);
        assert_eq!(config.timeouts.per_attempt(), Duration::from_secs(30));
    }

    #[test]
    fn snapshot_carries_models_bindings_and_aliases() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let snapshot = config.snapshot();
        assert!(snapshot.lookup_canonical("deepseek-chat").is_some());
        assert_eq!(snapshot.bindings_for("deepseek-chat").len(), 2);
        assert_eq!(
            snapshot.resolve_alias("default", None),
            vec!["deepseek-chat".to_string()]
        );
    }

    #[test]
    fn quality_and_price_tables_are_built_from_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(
            config.quality_table().get("deepseek/deepseek-chat"),
            Some(&8.0)
        );
        let prices = config.price_table();
        let (input, output) = prices.get("deepseek/deepseek-chat").unwrap();
        assert!(*input > 0.0 && *output > *input);
    }

    #[test]
    fn binding_to_unknown_provider_fails_validation() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.canonical_models[0].bindings[0].provider_key = "ghost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn auth_without_any_credential_source_fails_validation() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.auth.api_keys.clear();
        config.auth.jwt_secret = None;
        assert!(config.validate().is_err());
    }
}
