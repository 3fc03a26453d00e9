//! # Score Calculator
//!
//! Deterministic weighted scoring of enriched candidates. Every factor is
//! normalized into `[0, 1]` before weighting; the cost factor carries a
//! fixed weight of 0.1 so price breaks ties within a tier without being
//! policy-controlled.

use crate::policy::ScoringPolicy;

/// Fixed weight for the cost tiebreak factor.
const COST_WEIGHT: f64 = 0.1;

/// Everything the scorer needs to know about one candidate. Assembled by
/// the router from the registry, quota tracker and cost view.
#[derive(Debug, Clone, Default)]
pub struct CandidateSignals {
    /// Configured quality, 1..=10
    pub quality: f64,
    /// Estimated remaining quota percentage, 0..=100
    pub estimated_quota_remaining: f64,
    /// Requests already counted in the provider's current window
    pub requests_in_window: u32,
    /// Requests-per-minute cap, when one is configured
    pub rate_limit_rpm: Option<u32>,
    /// Smoothed provider latency, when observed
    pub ema_latency_ms: Option<f64>,
    /// Blended per-token price in USD
    pub price_per_token: f64,
    /// Provider free flag or binding free tier
    pub is_free: bool,
}

fn normalize(value: f64, min: f64, max: f64) -> f64 {
    if max <= min {
        return 0.0;
    }
    ((value - min) / (max - min)).clamp(0.0, 1.0)
}

fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Compute the score for one candidate under a merged policy.
///
/// `score = 100 · (Wq·qual + Wr·quota + Ws·safety + Wl·lat + 0.1·cost)`
/// plus the free-tier bonus when the policy prefers free candidates.
/// Deterministic: identical inputs always produce the identical score.
pub fn score_candidate(policy: &ScoringPolicy, signals: &CandidateSignals) -> f64 {
    let qual = normalize(signals.quality, 1.0, 10.0);
    let quota = clamp01(signals.estimated_quota_remaining / 100.0);
    let safety = match signals.rate_limit_rpm {
        Some(cap) if cap > 0 => {
            1.0 - clamp01(f64::from(signals.requests_in_window) / f64::from(cap))
        }
        // No cap configured: full headroom
        _ => 1.0,
    };
    let lat = 1.0 - normalize(signals.ema_latency_ms.unwrap_or(0.0), 0.0, 5000.0);
    let cost = 1.0 - normalize(signals.price_per_token, 0.0, 0.1);

    let weights = &policy.weights;
    let mut score = 100.0
        * (weights.quality * qual
            + weights.quota_remaining * quota
            + weights.rate_limit_safety * safety
            + weights.latency * lat
            + COST_WEIGHT * cost);

    if policy.prefer_free && signals.is_free {
        score += f64::from(policy.free_tier_bonus);
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ScoringWeights;

    fn healthy_signals() -> CandidateSignals {
        CandidateSignals {
            quality: 7.0,
            estimated_quota_remaining: 100.0,
            requests_in_window: 0,
            rate_limit_rpm: Some(60),
            ema_latency_ms: Some(800.0),
            price_per_token: 0.002,
            is_free: false,
        }
    }

    #[test]
    fn scoring_is_deterministic() {
        let policy = ScoringPolicy::default();
        let signals = healthy_signals();
        assert_eq!(
            score_candidate(&policy, &signals),
            score_candidate(&policy, &signals)
        );
    }

    #[test]
    fn free_candidate_gets_the_bonus_only_when_preferred() {
        let mut policy = ScoringPolicy::default();
        let mut signals = healthy_signals();

        let paid = score_candidate(&policy, &signals);
        signals.is_free = true;
        signals.price_per_token = 0.0;
        let free = score_candidate(&policy, &signals);
        assert!(free > paid + f64::from(policy.free_tier_bonus) - 1.0);

        policy.prefer_free = false;
        let free_unpreferred = score_candidate(&policy, &signals);
        assert!(free_unpreferred < free);
    }

    #[test]
    fn saturated_rate_limit_zeroes_the_safety_factor() {
        let policy = ScoringPolicy {
            weights: ScoringWeights {
                quality: 0.0,
                quota_remaining: 0.0,
                rate_limit_safety: 1.0,
                latency: 0.0,
            },
            prefer_free: false,
            ..Default::default()
        };
        let mut signals = healthy_signals();
        signals.price_per_token = 0.1; // cost factor bottoms out too
        signals.requests_in_window = 60;
        signals.rate_limit_rpm = Some(60);
        assert_eq!(score_candidate(&policy, &signals), 0.0);

        signals.requests_in_window = 0;
        assert_eq!(score_candidate(&policy, &signals), 100.0);
    }

    #[test]
    fn slow_provider_scores_below_fast_one() {
        let policy = ScoringPolicy::default();
        let fast = healthy_signals();
        let mut slow = healthy_signals();
        slow.ema_latency_ms = Some(5000.0);
        assert!(score_candidate(&policy, &fast) > score_candidate(&policy, &slow));
    }

    #[test]
    fn unknown_latency_counts_as_fastest() {
        let policy = ScoringPolicy::default();
        let mut signals = healthy_signals();
        signals.ema_latency_ms = None;
        let unseen = score_candidate(&policy, &signals);
        signals.ema_latency_ms = Some(0.0);
        assert_eq!(unseen, score_candidate(&policy, &signals));
    }
}
