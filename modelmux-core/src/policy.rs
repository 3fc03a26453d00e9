//! # Scoring Policy
//!
//! Flat policy value structs with an explicit three-level merge:
//! global defaults, then tenant overrides, then user overrides. Each field
//! inherits unless explicitly set at the narrower level. Weights are used
//! as-is; they must be finite and non-negative but need not sum to one.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Scoring weights for the candidate factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    #[serde(default = "default_quality_weight")]
    pub quality: f64,
    #[serde(default = "default_secondary_weight")]
    pub quota_remaining: f64,
    #[serde(default = "default_secondary_weight")]
    pub rate_limit_safety: f64,
    #[serde(default = "default_secondary_weight")]
    pub latency: f64,
}

fn default_quality_weight() -> f64 {
    0.4
}

fn default_secondary_weight() -> f64 {
    0.2
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            quality: default_quality_weight(),
            quota_remaining: default_secondary_weight(),
            rate_limit_safety: default_secondary_weight(),
            latency: default_secondary_weight(),
        }
    }
}

impl ScoringWeights {
    /// Weights must be finite and non-negative.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("quality", self.quality),
            ("quota_remaining", self.quota_remaining),
            ("rate_limit_safety", self.rate_limit_safety),
            ("latency", self.latency),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("weight {name} must be finite and >= 0, got {value}"));
            }
        }
        Ok(())
    }
}

/// Fully-resolved scoring policy used by the score calculator. Every field
/// has a configuration default, so partial policy tables deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    #[serde(default)]
    pub weights: ScoringWeights,
    #[serde(default = "default_free_tier_bonus")]
    pub free_tier_bonus: i32,
    #[serde(default)]
    pub min_score_threshold: f64,
    #[serde(default = "default_prefer_free")]
    pub prefer_free: bool,
}

fn default_free_tier_bonus() -> i32 {
    50
}

fn default_prefer_free() -> bool {
    true
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            free_tier_bonus: default_free_tier_bonus(),
            min_score_threshold: 0.0,
            prefer_free: default_prefer_free(),
        }
    }
}

/// Partial policy: every field optional, inheriting from the wider level
/// when unset. One struct serves both tenant and user override tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_safety_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_tier_bonus: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefer_free: Option<bool>,
}

impl PolicyOverrides {
    pub fn is_empty(&self) -> bool {
        self.quality_weight.is_none()
            && self.quota_weight.is_none()
            && self.rate_limit_safety_weight.is_none()
            && self.latency_weight.is_none()
            && self.free_tier_bonus.is_none()
            && self.min_score_threshold.is_none()
            && self.prefer_free.is_none()
    }
}

fn apply(base: ScoringPolicy, overrides: &PolicyOverrides) -> ScoringPolicy {
    ScoringPolicy {
        weights: ScoringWeights {
            quality: overrides.quality_weight.unwrap_or(base.weights.quality),
            quota_remaining: overrides
                .quota_weight
                .unwrap_or(base.weights.quota_remaining),
            rate_limit_safety: overrides
                .rate_limit_safety_weight
                .unwrap_or(base.weights.rate_limit_safety),
            latency: overrides.latency_weight.unwrap_or(base.weights.latency),
        },
        free_tier_bonus: overrides.free_tier_bonus.unwrap_or(base.free_tier_bonus),
        min_score_threshold: overrides
            .min_score_threshold
            .unwrap_or(base.min_score_threshold),
        prefer_free: overrides.prefer_free.unwrap_or(base.prefer_free),
    }
}

/// Global policy plus per-tenant and per-user override tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyStore {
    #[serde(default)]
    pub global: ScoringPolicy,
    #[serde(default)]
    pub tenant_overrides: HashMap<String, PolicyOverrides>,
    #[serde(default)]
    pub user_overrides: HashMap<String, PolicyOverrides>,
}

impl PolicyStore {
    /// Merge global → tenant → user for the given principal.
    pub fn merged(&self, tenant_id: Option<&str>, user_id: Option<&str>) -> ScoringPolicy {
        let mut policy = self.global.clone();
        if let Some(overrides) = tenant_id.and_then(|t| self.tenant_overrides.get(t)) {
            policy = apply(policy, overrides);
        }
        if let Some(overrides) = user_id.and_then(|u| self.user_overrides.get(u)) {
            policy = apply(policy, overrides);
        }
        policy
    }
}
