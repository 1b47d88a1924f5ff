//! Per-key requeue backoff with jitter.
//!
//! The controller redelivers a key that failed with a retryable error after
//! an exponentially growing delay. Each key keeps its own failure count,
//! cleared by the next successful reconcile, so one broken channel does not
//! slow down the others. A channel deleted while backing off is never
//! reconciled again, so counters that have not moved for twice the maximum
//! delay are dropped.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;

/// Backoff shape for failed reconciles
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Un-jittered delay after `failures` consecutive failures (1-based)
    pub fn base_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    count: u32,
    last: Instant,
}

/// Failure counters keyed by `namespace/name`
#[derive(Debug, Default)]
pub struct KeyedBackoff {
    config: BackoffConfig,
    failures: DashMap<String, FailureRecord>,
}

impl KeyedBackoff {
    /// Create a tracker with the given backoff shape
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: DashMap::new(),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying
    pub fn next_delay(&self, key: &str) -> Duration {
        let now = Instant::now();
        self.prune(now);

        let failures = {
            let mut entry = self
                .failures
                .entry(key.to_string())
                .or_insert(FailureRecord {
                    count: 0,
                    last: now,
                });
            entry.count = entry.count.saturating_add(1);
            entry.last = now;
            entry.count
        };
        let delay = self.config.base_delay(failures);

        // Add jitter: 0.5x to 1.5x of the delay, never past max_delay
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64(
            (delay.as_secs_f64() * jitter).min(self.config.max_delay.as_secs_f64()),
        )
    }

    /// Forget the failures of `key` after a successful reconcile
    pub fn reset(&self, key: &str) {
        self.failures.remove(key);
    }

    /// Consecutive failures currently recorded for `key`
    pub fn failures(&self, key: &str) -> u32 {
        self.failures.get(key).map(|r| r.count).unwrap_or(0)
    }

    /// Number of keys with a recorded failure
    pub fn tracked_keys(&self) -> usize {
        self.failures.len()
    }

    fn prune(&self, now: Instant) {
        let stale_after = self.config.max_delay.saturating_mul(2);
        self.failures
            .retain(|_, record| now.saturating_duration_since(record.last) < stale_after);
    }
}
