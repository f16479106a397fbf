//! Redelivery policy for failed submissions.
//!
//! A failed submission is never retried in-process. The failure is handed back
//! to the event source together with a fixed delay, and the event source
//! redelivers the same resource once the delay has passed. An optional cap on
//! attempts lets an operator stop redelivering a report DefectDojo keeps
//! rejecting.

use std::time::Duration;

use crate::DEFAULT_RETRY_DELAY_SECS;

/// Policy for redelivering a resource whose submission failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the resource is redelivered; constant across attempts
    pub delay: Duration,
    /// Maximum number of attempts per resource (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            max_attempts: None,
        }
    }
}

/// What to do after a failed attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Redeliver the resource after the given delay
    RetryAfter(Duration),
    /// Stop redelivering; the attempt cap has been reached
    GiveUp,
}

impl RetryPolicy {
    /// Create a policy with a fixed delay and no attempt cap
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Cap the number of attempts. Zero means unlimited.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = (attempts > 0).then_some(attempts);
        self
    }

    /// Decide what happens after `attempts` failed attempts (1-based).
    pub fn decide(&self, attempts: u32) -> RetryDecision {
        match self.max_attempts {
            Some(max) if attempts >= max => RetryDecision::GiveUp,
            _ => RetryDecision::RetryAfter(self.delay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_sixty_seconds_unlimited() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay, Duration::from_secs(60));
        assert_eq!(policy.max_attempts, None);
    }

    #[test]
    fn unlimited_policy_always_retries_with_the_same_delay() {
        let policy = RetryPolicy::fixed(Duration::from_secs(30));
        for attempt in [1, 2, 10, 10_000] {
            assert_eq!(
                policy.decide(attempt),
                RetryDecision::RetryAfter(Duration::from_secs(30))
            );
        }
    }

    #[test]
    fn capped_policy_gives_up_at_the_cap() {
        let policy = RetryPolicy::fixed(Duration::from_secs(5)).with_max_attempts(3);
        assert_eq!(
            policy.decide(1),
            RetryDecision::RetryAfter(Duration::from_secs(5))
        );
        assert_eq!(
            policy.decide(2),
            RetryDecision::RetryAfter(Duration::from_secs(5))
        );
        assert_eq!(policy.decide(3), RetryDecision::GiveUp);
        assert_eq!(policy.decide(4), RetryDecision::GiveUp);
    }

    #[test]
    fn zero_max_attempts_means_unlimited() {
        let policy = RetryPolicy::default().with_max_attempts(0);
        assert_eq!(policy.max_attempts, None);
    }
}
