//! ---
//! cl_section: "04-liveness-channel"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Reconnect scheduling strategies."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
use std::time::Duration;

use corelink_common::ReconnectConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Policy parameters controlling reconnect delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the second attempt; doubles afterwards.
    pub base_delay: Duration,
    /// Upper bound on the exponential component.
    pub max_delay: Duration,
    /// Maximum jitter added on top of each delay.
    pub jitter: Duration,
}

impl ReconnectPolicy {
    /// Construct a policy. `max_delay` is raised to `base_delay` if smaller.
    pub fn new(base_delay: Duration, max_delay: Duration, jitter: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter,
        }
    }

    /// Delay before the given attempt (1-indexed), excluding jitter.
    pub fn base_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }

    /// Start a fresh backoff sequence.
    pub fn start(&self) -> Backoff {
        Backoff {
            policy: *self,
            attempt: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Start a sequence with a deterministic jitter source.
    pub fn start_seeded(&self, seed: u64) -> Backoff {
        Backoff {
            policy: *self,
            attempt: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self::new(config.base_delay, config.max_delay, config.jitter)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

/// Stateful delay sequence for one run of failed attempts.
#[derive(Debug)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
    rng: StdRng,
}

impl Backoff {
    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let base = self.policy.base_for(self.attempt);
        let delay = if self.policy.jitter.is_zero() {
            base
        } else {
            let jitter_ms = self
                .rng
                .gen_range(0..=self.policy.jitter.as_millis().max(1) as u64);
            base + Duration::from_millis(jitter_ms)
        };
        debug!(attempt = self.attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        delay
    }

    /// Number of delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Forget previous failures after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter_ms: u64) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_millis(100),
            Duration::from_millis(1_000),
            Duration::from_millis(jitter_ms),
        )
    }

    #[test]
    fn delays_double_until_capped() {
        let mut backoff = policy(0).start();
        let delays: Vec<u128> = (0..7).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000, 1_000]);
    }

    #[test]
    fn attempts_are_unbounded() {
        let mut backoff = policy(0).start();
        for _ in 0..10_000 {
            assert!(backoff.next_delay() <= Duration::from_millis(1_000));
        }
        assert_eq!(backoff.attempts(), 10_000);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut backoff = policy(50).start_seeded(1234);
        let first = backoff.next_delay();
        assert!(first >= Duration::from_millis(100));
        assert!(first <= Duration::from_millis(150));
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut backoff = policy(0).start();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn max_is_never_below_base() {
        let policy = ReconnectPolicy::new(
            Duration::from_secs(2),
            Duration::from_secs(1),
            Duration::ZERO,
        );
        assert_eq!(policy.max_delay, Duration::from_secs(2));
    }
}
