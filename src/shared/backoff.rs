//! Jittered Exponential Backoff
//!
//! Shared retry-delay policy used by the fanout bus reconnect loop and the
//! job worker pool. Jitter keeps a fleet of instances from retrying in
//! lockstep after a shared dependency outage.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff policy: `base * 2^(attempt-1)`, capped, with
/// multiplicative jitter of up to `jitter` in either direction.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub jitter: f64,
}

impl BackoffPolicy {
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter: 0.25,
        }
    }

    /// Nominal (un-jittered) delay for a 1-based attempt number.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 2u32.saturating_pow(exp);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Jittered delay for a 1-based attempt number, never above the cap.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt);
        if self.jitter <= 0.0 {
            return nominal;
        }
        let spread = rand::rng().random_range(-self.jitter..=self.jitter);
        nominal.mul_f64(1.0 + spread).min(self.cap)
    }
}

/// Stateful backoff counter for reconnect loops.
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay before the next attempt. The first call yields roughly `base`.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.policy.delay_for_attempt(self.attempt)
    }

    /// Reset after a successful attempt so the next failure starts from base.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
