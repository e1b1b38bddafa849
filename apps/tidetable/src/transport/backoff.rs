use std::time::Duration;

/// Reconnect delay policy: `min(initial * 2^retries, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub const DEFAULT_INITIAL: Duration = Duration::from_millis(1_000);
    pub const DEFAULT_MAX: Duration = Duration::from_millis(15_000);

    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INITIAL, Self::DEFAULT_MAX)
    }
}

/// Retry counter for consecutive connection failures.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    retry_count: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            retry_count: 0,
        }
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Delay before the next attempt; bumps the retry counter.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.checked_pow(self.retry_count).unwrap_or(u32::MAX);
        let delay = self
            .policy
            .initial
            .checked_mul(factor)
            .unwrap_or(self.policy.max)
            .min(self.policy.max);
        self.retry_count = self.retry_count.saturating_add(1);
        delay
    }

    /// Called after a successful open.
    pub fn reset(&mut self) {
        self.retry_count = 0;
    }
}
