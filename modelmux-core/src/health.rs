//! # Provider Health Store
//!
//! Per-provider cooldown tracking. A failure puts the provider into cooldown
//! for a duration that doubles with each consecutive failure up to a cap;
//! one success clears everything. The store is advisory: routing consults
//! it, but correctness never depends on it being durable or complete.
//!
//! State is keyed by provider key in a lock-striped map; `ok` is always
//! derived from `cooldown_until` against the clock, never stored.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Cooldown growth cap. `base * 2^(n-1)` never exceeds this.
const MAX_COOLDOWN: Duration = Duration::from_secs(300);

/// Mutable health record for one provider.
#[derive(Debug, Clone)]
pub struct HealthState {
    pub cooldown_until: Option<Instant>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl HealthState {
    fn healthy() -> Self {
        Self {
            cooldown_until: None,
            consecutive_failures: 0,
            last_error: None,
        }
    }

    /// Derived, never stored: healthy iff no cooldown is pending.
    pub fn is_ok(&self, now: Instant) -> bool {
        match self.cooldown_until {
            Some(until) => now >= until,
            None => true,
        }
    }
}

/// Process-wide provider health store.
///
/// Created once by the composition root and shared; safe under concurrent
/// mutation from parallel fallback loops.
#[derive(Debug, Default)]
pub struct HealthStore {
    states: DashMap<String, HealthState>,
}

impl HealthStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the provider has no pending cooldown. Unknown providers are
    /// healthy; state is created on first failure.
    pub fn is_healthy(&self, key: &str) -> bool {
        match self.states.get(key) {
            Some(state) => state.is_ok(Instant::now()),
            None => true,
        }
    }

    /// Clear cooldown and failure count after a successful invocation.
    pub fn mark_success(&self, key: &str) {
        self.states.insert(key.to_string(), HealthState::healthy());
    }

    /// Record a failure and start (or extend) a cooldown.
    ///
    /// The effective cooldown is `base * 2^(n-1)` where `n` is the number of
    /// consecutive failures including this one, capped at five minutes.
    pub fn mark_failure(&self, key: &str, base_cooldown: Duration, error: &str) {
        let now = Instant::now();
        let mut entry = self
            .states
            .entry(key.to_string())
            .or_insert_with(HealthState::healthy);
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        let exponent = entry.consecutive_failures.saturating_sub(1).min(16);
        let cooldown = base_cooldown
            .saturating_mul(1u32 << exponent)
            .min(MAX_COOLDOWN);
        entry.cooldown_until = Some(now + cooldown);
        entry.last_error = Some(error.to_string());

        tracing::warn!(
            provider = key,
            consecutive_failures = entry.consecutive_failures,
            cooldown_secs = cooldown.as_secs(),
            error,
            "provider entering cooldown"
        );
    }

    /// Snapshot of one provider's state, for admin/diagnostic surfaces.
    pub fn state(&self, key: &str) -> Option<HealthState> {
        self.states.get(key).map(|s| s.clone())
    }
}
