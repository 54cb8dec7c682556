//! Reconnection backoff for event clients

use std::time::Duration;

/// How a client retries after losing its connection.
///
/// Delays grow geometrically from `initial_delay` up to `max_delay`. After
/// `max_attempts` failed dials the client reports `Disconnected` and keeps
/// retrying every `idle_retry` until it is closed.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
    pub max_attempts: u32,
    pub idle_retry: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            multiplier: 2,
            max_attempts: 10,
            idle_retry: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given 1-based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            attempt: 0,
        }
    }
}

/// Attempt counter for one reconnection episode
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    /// Advance to the next attempt and return how long to wait before it
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        if self.attempt <= self.policy.max_attempts {
            self.policy.delay_for(self.attempt)
        } else {
            self.policy.idle_retry
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// True once the fast retry budget is used up
    pub fn exhausted(&self) -> bool {
        self.attempt >= self.policy.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            multiplier: 2,
            max_attempts: 3,
            idle_retry: Duration::from_secs(7),
        }
    }

    #[test]
    fn test_delays_grow_and_cap() {
        let policy = policy();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(60), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_settles_on_idle_retry() {
        let mut backoff = policy().backoff();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert!(!backoff.exhausted());
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert!(backoff.exhausted());
        assert_eq!(backoff.next_delay(), Duration::from_secs(7));
        assert_eq!(backoff.next_delay(), Duration::from_secs(7));
        assert_eq!(backoff.attempts(), 5);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_zero_multiplier_is_constant() {
        let policy = ReconnectPolicy {
            multiplier: 0,
            ..policy()
        };
        assert_eq!(policy.delay_for(1), policy.delay_for(3));
    }
}
