//! Reconnect backoff with jitter.
//!
//! Delays grow exponentially from `base` and are capped at `max`:
//!
//! ```text
//! exp(n)   = base * 2^(n-1)
//! delay(n) = min(max, exp(n) + jitter),  jitter in [0, jitter_ratio * exp(n))
//! ```
//!
//! With `jitter_ratio <= 1`, `exp(n+1) = 2 * exp(n)` is never below the
//! largest possible `delay(n)`, so consecutive delays are non-decreasing up
//! to the ceiling regardless of the random draw.

use std::time::Duration;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first reconnect attempt.
    pub base: Duration,
    /// Ceiling for any delay.
    pub max: Duration,
    /// Jitter as a fraction of the exponential component (0.0..=1.0).
    pub jitter_ratio: f64,
}

impl BackoffPolicy {
    /// Create a policy, clamping `jitter_ratio` into `0.0..=1.0`.
    pub fn new(base: Duration, max: Duration, jitter_ratio: f64) -> Self {
        let jitter_ratio = if jitter_ratio.is_nan() {
            0.0
        } else {
            jitter_ratio.clamp(0.0, 1.0)
        };
        Self {
            base,
            max,
            jitter_ratio,
        }
    }

    /// Exponential component for the given attempt (1-based), before jitter.
    pub fn exponential(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(32);
        let base_ms = self.base.as_millis() as u64;
        let exp_ms = base_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(exp_ms).min(self.max)
    }

    /// Delay for the given attempt using `unit` in `[0, 1)` as the jitter draw.
    pub fn delay_with(&self, attempt: u32, unit: f64) -> Duration {
        let exp = self.exponential(attempt);
        let unit = if unit.is_finite() {
            unit.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let jitter_ms = (exp.as_millis() as f64 * self.jitter_ratio * unit) as u64;
        (exp + Duration::from_millis(jitter_ms)).min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30), 0.25)
    }
}

/// Stateful backoff: counts consecutive reconnect attempts.
///
/// The counter only resets through [`reset`](Self::reset), which the
/// connection state machine calls once a Live connection has been sustained.
/// A connection that drops right after reaching Live keeps backing off.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    /// Create a backoff with no attempts recorded.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Record another attempt and return `(attempt, delay)`.
    pub fn next_delay(&mut self) -> (u32, Duration) {
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.policy.delay_with(self.attempt, random_unit());
        (self.attempt, delay)
    }

    /// Number of attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Back to the base delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// The policy in use.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}

/// Uniform draw in `[0, 1)` from the OS RNG, or 0 if it is unavailable.
fn random_unit() -> f64 {
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return 0.0;
    }
    // 53 random bits map exactly onto f64 mantissa precision
    let bits = u64::from_le_bytes(bytes) >> 11;
    bits as f64 / (1u64 << 53) as f64
}
