//! Per-node retry policy with capped exponential backoff.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::node::ErrorKind;

/// How a node's failures are retried within a superstep.
///
/// `max_attempts` counts invocations, not retries: a policy of 3 means the
/// handler runs at most 3 times. Backoff between attempts is exponential
/// over `base_delay`, capped at `max_delay`, with optional proportional
/// jitter.
///
/// # Examples
///
/// ```rust
/// use phaseloom::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.max_attempts, 3);
/// assert_eq!(policy.delay_for(1), Duration::from_millis(200));
/// assert_eq!(policy.delay_for(2), Duration::from_millis(400));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum handler invocations, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound on any single backoff delay.
    pub max_delay: Duration,
    /// Failure kinds worth retrying.
    pub retry_on: Vec<ErrorKind>,
    /// Proportional jitter in `[0.0, 1.0]`; 0 disables it.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            retry_on: vec![ErrorKind::Transient],
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            retry_on: Vec::new(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    #[must_use]
    pub fn with_retry_on(mut self, kinds: Vec<ErrorKind>) -> Self {
        self.retry_on = kinds;
        self
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Whether failures of this kind are retried at all.
    #[must_use]
    pub fn retries(&self, kind: ErrorKind) -> bool {
        self.retry_on.contains(&kind)
    }

    /// Backoff before the attempt following failed attempt `attempt`
    /// (1-based).
    ///
    /// `delay_for(1)` is the wait between attempt 1 and attempt 2. The
    /// exponential curve is capped at `max_delay`; jitter, when enabled,
    /// adds a uniform fraction of the computed delay.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u64 << exponent;
        let base = self
            .base_delay
            .checked_mul(factor as u32)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = base.as_secs_f64() * self.jitter * rand::random::<f64>();
        (base + Duration::from_secs_f64(spread)).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retries_only_transient() {
        let policy = RetryPolicy::default();
        assert!(policy.retries(ErrorKind::Transient));
        assert!(!policy.retries(ErrorKind::Permanent));
        assert!(!policy.retries(ErrorKind::Timeout));
        assert!(!policy.retries(ErrorKind::InvalidInput));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(10), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_millis(100))
            .with_jitter(0.5);
        for _ in 0..32 {
            let d = policy.delay_for(1);
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn none_never_retries() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.retries(ErrorKind::Transient));
    }
}
