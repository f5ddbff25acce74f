//! Retry policy: attempt budget and exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Fraction of the computed delay that jitter may add or remove.
pub const JITTER_RATIO: f64 = 0.1;

/// Retry configuration for failed work items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total executions allowed before an item is dead-lettered.
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(with = "millis")]
    pub base_backoff: Duration,
    /// Growth multiplier applied per failed attempt.
    pub factor: f64,
    /// Ceiling for any single delay, jitter included.
    #[serde(with = "millis")]
    pub max_backoff: Duration,
    /// Randomize each delay by up to ±`JITTER_RATIO`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(100),
            factor: 2.0,
            max_backoff: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_backoff: Duration,
        factor: f64,
        max_backoff: Duration,
        jitter: bool,
    ) -> Self {
        Self {
            max_attempts,
            base_backoff,
            factor,
            max_backoff,
            jitter,
        }
    }

    /// Has an item with `attempts` failures used up its budget?
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Deterministic delay after the `attempts`-th failure (1-indexed):
    /// `min(base * factor^(attempts - 1), max)`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_backoff.as_secs_f64() * self.factor.powi(exp);
        clamp_secs(secs, self.max_backoff)
    }

    /// The delay actually used to arm a retry timer.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let delay = self.backoff(attempts);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let offset = rand::rng().random_range(-JITTER_RATIO..=JITTER_RATIO);
        clamp_secs(delay.as_secs_f64() * (1.0 + offset), self.max_backoff)
    }
}

fn clamp_secs(secs: f64, max: Duration) -> Duration {
    if !secs.is_finite() || secs >= max.as_secs_f64() {
        max
    } else if secs <= 0.0 {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(secs)
    }
}

/// Serialize durations as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: bool) -> RetryPolicy {
        RetryPolicy::new(
            4,
            Duration::from_millis(50),
            2.0,
            Duration::from_secs(5),
            jitter,
        )
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let p = policy(false);
        assert_eq!(p.backoff(1), Duration::from_millis(50));
        assert_eq!(p.backoff(2), Duration::from_millis(100));
        assert_eq!(p.backoff(3), Duration::from_millis(200));
    }

    #[test]
    fn backoff_is_capped() {
        let p = policy(false);
        assert_eq!(p.backoff(20), Duration::from_secs(5));
        assert_eq!(p.backoff(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn zero_attempts_uses_base() {
        assert_eq!(policy(false).backoff(0), Duration::from_millis(50));
    }

    #[test]
    fn delay_without_jitter_is_exact() {
        let p = policy(false);
        for attempt in 1..=3 {
            assert_eq!(p.delay_for(attempt), p.backoff(attempt));
        }
    }

    #[test]
    fn jitter_stays_within_ratio_and_cap() {
        let p = policy(true);
        let base = p.backoff(3).as_secs_f64();
        let mut distinct = std::collections::HashSet::new();
        for _ in 0..200 {
            let d = p.delay_for(3);
            let secs = d.as_secs_f64();
            assert!(secs >= base * (1.0 - JITTER_RATIO) - 1e-9);
            assert!(secs <= base * (1.0 + JITTER_RATIO) + 1e-9);
            distinct.insert(d.as_nanos());
        }
        assert!(distinct.len() > 1, "jitter never changed the delay");

        let capped = p.delay_for(30);
        assert!(capped <= p.max_backoff);
    }

    #[test]
    fn exhaustion_is_inclusive() {
        let p = policy(false);
        assert!(!p.is_exhausted(3));
        assert!(p.is_exhausted(4));
    }

    #[test]
    fn policy_reads_millis_from_toml() {
        let p: RetryPolicy = toml::from_str(
            "max_attempts = 3\nbase_backoff = 5\nfactor = 3.0\nmax_backoff = 40\njitter = false\n",
        )
        .unwrap();
        assert_eq!(p.base_backoff, Duration::from_millis(5));
        assert_eq!(p.max_backoff, Duration::from_millis(40));
        assert_eq!(p.factor, 3.0);
        assert!(!p.jitter);
    }
}
