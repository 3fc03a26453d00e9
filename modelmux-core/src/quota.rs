//! # Quota Tracker
//!
//! Per-provider request and token counters over a fixed 60-second window.
//! `check_quota` is advisory and fail-open: a provider with no configured
//! caps, or a counter that cannot be read, is treated as under quota. Usage
//! is recorded after the adapter reports it (post-response, or on stream
//! completion).

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Window length for both request and token counters.
const WINDOW: Duration = Duration::from_secs(60);

/// Caps applied to one provider, resolved binding-first then provider
/// defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuotaCaps {
    pub requests_per_minute: Option<u32>,
    pub tokens_per_minute: Option<u32>,
}

impl QuotaCaps {
    pub fn is_unlimited(&self) -> bool {
        self.requests_per_minute.is_none() && self.tokens_per_minute.is_none()
    }
}

#[derive(Debug, Clone)]
struct WindowCounters {
    window_start: Instant,
    requests: u32,
    tokens: u64,
}

impl WindowCounters {
    fn fresh(now: Instant) -> Self {
        Self {
            window_start: now,
            requests: 0,
            tokens: 0,
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.duration_since(self.window_start) >= WINDOW {
            *self = Self::fresh(now);
        }
    }
}

/// Process-wide sliding-window quota tracker, keyed by provider.
#[derive(Debug, Default)]
pub struct QuotaTracker {
    counters: DashMap<String, WindowCounters>,
}

impl QuotaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the provider's current-window counters are under `caps`.
    /// Fail-open: unlimited caps or absent counters pass.
    pub fn check_quota(&self, key: &str, caps: &QuotaCaps) -> bool {
        if caps.is_unlimited() {
            return true;
        }
        let now = Instant::now();
        let Some(mut entry) = self.counters.get_mut(key) else {
            return true;
        };
        entry.roll(now);
        if let Some(rpm) = caps.requests_per_minute {
            if entry.requests >= rpm {
                return false;
            }
        }
        if let Some(tpm) = caps.tokens_per_minute {
            if entry.tokens >= u64::from(tpm) {
                return false;
            }
        }
        true
    }

    /// Count one successful request in the current window.
    pub fn record_request(&self, key: &str) {
        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| WindowCounters::fresh(now));
        entry.roll(now);
        entry.requests = entry.requests.saturating_add(1);
    }

    /// Add reported token usage to the current window.
    pub fn record_usage(&self, key: &str, input_tokens: u32, output_tokens: u32) {
        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| WindowCounters::fresh(now));
        entry.roll(now);
        entry.tokens = entry
            .tokens
            .saturating_add(u64::from(input_tokens) + u64::from(output_tokens));
    }

    /// Requests observed in the provider's current window. Used by the
    /// scorer's rate-limit-safety factor.
    pub fn requests_in_window(&self, key: &str) -> u32 {
        let now = Instant::now();
        match self.counters.get_mut(key) {
            Some(mut entry) => {
                entry.roll(now);
                entry.requests
            }
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_caps_always_pass() {
        let tracker = QuotaTracker::new();
        for _ in 0..1000 {
            tracker.record_request("free-for-all");
        }
        assert!(tracker.check_quota("free-for-all", &QuotaCaps::default()));
    }

    #[test]
    fn request_cap_is_enforced_within_window() {
        let tracker = QuotaTracker::new();
        let caps = QuotaCaps {
            requests_per_minute: Some(3),
            tokens_per_minute: None,
        };
        for _ in 0..3 {
            assert!(tracker.check_quota("deepseek", &caps));
            tracker.record_request("deepseek");
        }
        assert!(!tracker.check_quota("deepseek", &caps));
    }

    #[test]
    fn token_cap_counts_both_directions() {
        let tracker = QuotaTracker::new();
        let caps = QuotaCaps {
            requests_per_minute: None,
            tokens_per_minute: Some(100),
        };
        tracker.record_usage("openrouter", 60, 39);
        assert!(tracker.check_quota("openrouter", &caps));
        tracker.record_usage("openrouter", 1, 0);
        assert!(!tracker.check_quota("openrouter", &caps));
    }

    #[test]
    fn unseen_provider_passes() {
        let tracker = QuotaTracker::new();
        let caps = QuotaCaps {
            requests_per_minute: Some(1),
            tokens_per_minute: Some(1),
        };
        assert!(tracker.check_quota("brand-new", &caps));
        assert_eq!(tracker.requests_in_window("brand-new"), 0);
    }
}
