//! Exponential backoff with jitter for store retries and cycle deferral.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponential backoff, capped at `max`, with a bounded attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    #[serde(with = "millis", rename = "base_ms")]
    pub base: Duration,
    #[serde(with = "millis", rename = "max_ms")]
    pub max: Duration,
    /// Transient failures tolerated before the attempt is deferred.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Un-jittered delay for a 1-based attempt: `base * 2^(attempt-1)`, capped.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Equal jitter: half the delay is fixed, the other half uniform random,
    /// so the result lies in `[d/2, d]`.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        let half = delay / 2;
        let spread = (delay - half).as_millis() as u64;
        if spread == 0 {
            return delay;
        }
        half + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_millis(1_000),
            max_attempts: 3,
        }
    }

    #[test]
    fn doubles_until_cap() {
        let p = policy();
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(p.delay_for_attempt(4), Duration::from_millis(800));
        assert_eq!(p.delay_for_attempt(5), Duration::from_millis(1_000));
        assert_eq!(p.delay_for_attempt(200), Duration::from_millis(1_000));
    }

    #[test]
    fn attempt_zero_is_treated_as_first() {
        assert_eq!(policy().delay_for_attempt(0), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_half_and_full_delay() {
        let p = policy();
        for attempt in 1..=6 {
            let full = p.delay_for_attempt(attempt);
            for _ in 0..50 {
                let d = p.jittered_delay(attempt);
                assert!(d >= full / 2 && d <= full, "{d:?} outside [{:?}, {full:?}]", full / 2);
            }
        }
    }

    #[test]
    fn zero_base_never_sleeps() {
        let p = BackoffPolicy {
            base: Duration::ZERO,
            max: Duration::ZERO,
            max_attempts: 1,
        };
        assert_eq!(p.jittered_delay(3), Duration::ZERO);
    }

    #[test]
    fn exhaustion_uses_attempt_budget() {
        let p = policy();
        assert!(!p.exhausted(2));
        assert!(p.exhausted(3));
    }
}
