//! # Cost and Latency View
//!
//! Read-only projection of per-(provider, model) pricing and a per-provider
//! latency EMA. Prices come from binding overrides first, then a configured
//! price table; the latency average is updated on every successful
//! invocation with a smoothing factor of 0.2.

use crate::registry::{ProviderDefinition, ProviderModelBinding};
use dashmap::DashMap;
use std::collections::HashMap;

/// EMA smoothing factor for latency samples.
const LATENCY_ALPHA: f64 = 0.2;

/// Pricing for one (provider, model) pair, USD per token.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CostProjection {
    pub input_price: f64,
    pub output_price: f64,
    pub free_tier: bool,
}

impl CostProjection {
    /// Blended per-token price used by the scorer's tiebreak factor.
    pub fn price_per_token(&self) -> f64 {
        if self.free_tier {
            0.0
        } else {
            (self.input_price + self.output_price) / 2.0
        }
    }
}

/// Default prices keyed by `provider/canonical_id`, loaded from
/// configuration. Binding-level overrides win over this table.
pub type PriceTable = HashMap<String, (f64, f64)>;

/// Quality scores (1..=10) keyed by `provider/canonical_id`.
pub type QualityTable = HashMap<String, f64>;

/// Quality assumed for pairs with no configured score.
const DEFAULT_QUALITY: f64 = 5.0;

/// Process-wide cost/latency projection.
#[derive(Debug, Default)]
pub struct CostView {
    prices: PriceTable,
    quality: QualityTable,
    latency_ema_ms: DashMap<String, f64>,
}

impl CostView {
    pub fn new(prices: PriceTable, quality: QualityTable) -> Self {
        Self {
            prices,
            quality,
            latency_ema_ms: DashMap::new(),
        }
    }

    /// Configured quality score for a (provider, model) pair, 1..=10.
    pub fn quality_of(&self, provider_key: &str, canonical_id: &str) -> f64 {
        self.quality
            .get(&format!("{provider_key}/{canonical_id}"))
            .copied()
            .unwrap_or(DEFAULT_QUALITY)
    }

    /// Pricing for a binding: overrides win, then the price table, then
    /// zero. Free tier is the provider flag or the binding flag.
    pub fn cost_of(
        &self,
        provider: &ProviderDefinition,
        binding: &ProviderModelBinding,
    ) -> CostProjection {
        let table_entry = self
            .prices
            .get(&format!("{}/{}", provider.key, binding.canonical_id))
            .copied();
        let (table_input, table_output) = table_entry.unwrap_or((0.0, 0.0));
        CostProjection {
            input_price: binding.override_input_price.unwrap_or(table_input),
            output_price: binding.override_output_price.unwrap_or(table_output),
            free_tier: provider.free || binding.free_tier,
        }
    }

    /// Smoothed latency for a provider, if any sample has been observed.
    pub fn latency_of(&self, provider_key: &str) -> Option<f64> {
        self.latency_ema_ms.get(provider_key).map(|v| *v)
    }

    /// Fold one successful-invocation latency sample into the EMA.
    pub fn observe_latency(&self, provider_key: &str, latency_ms: u64) {
        let sample = latency_ms as f64;
        self.latency_ema_ms
            .entry(provider_key.to_string())
            .and_modify(|ema| *ema = LATENCY_ALPHA * sample + (1.0 - LATENCY_ALPHA) * *ema)
            .or_insert(sample);
    }
}
