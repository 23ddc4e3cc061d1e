//! Per-key exponential backoff with jitter.
//!
//! Failed reconciliations are retried without an attempt limit; the
//! application stays the source of truth until it is deleted. Only the
//! interval is bounded.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use harbor_store::ObjectKey;
use rand::Rng;

const DEFAULT_BASE_DELAY_MS: u64 = 5;
const DEFAULT_MAX_DELAY_MS: u64 = 60_000;
const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Backoff policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Fraction of the delay that is randomized (0.0 - 1.0).
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl BackoffPolicy {
    /// Create a new policy with the default jitter.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }

    /// Set jitter factor.
    #[must_use]
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Delay before retry number `attempt` (0-indexed).
    ///
    /// `min(base * 2^attempt, max)`, then up to `jitter_factor` of it is
    /// taken off at random so that keys failing together spread out.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let capped = base_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(max_ms);

        let factor = self.jitter_factor.clamp(0.0, 1.0);
        let jitter_ms = if factor > 0.0 && capped > 0 {
            let range = capped as f64 * factor;
            rand::thread_rng().gen_range(0.0..range).floor() as u64
        } else {
            0
        };

        Duration::from_millis(capped.saturating_sub(jitter_ms))
    }
}

/// Tracks consecutive failures per key.
#[derive(Debug, Default)]
pub struct BackoffTracker {
    policy: BackoffPolicy,
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl BackoffTracker {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Record a failure of `key` and get the delay before its retry.
    pub fn next_delay(&self, key: &ObjectKey) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let attempt = failures.entry(key.clone()).or_insert(0);
        let delay = self.policy.delay_for(*attempt);
        *attempt = attempt.saturating_add(1);
        delay
    }

    /// Consecutive failures recorded for `key`.
    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Reset `key` after a successful reconciliation.
    pub fn forget(&self, key: &ObjectKey) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}
