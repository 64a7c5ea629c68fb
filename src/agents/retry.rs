//! Retry state machine for consumer agents.
//!
//! ```text
//!   error ──► record_retry ──► count < max_retries ──► queued (cooldown)
//!                          └─► count ≥ max_retries ──► failed (terminal)
//!   permanent / malformed ────────────────────────────► failed (terminal)
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::AgentError;

/// Default maximum attempts before an item is marked failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default cooldown before a failed item is eligible again.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// What to do with an item after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Leave it queued; hold it out of selection for `delay`.
    Retry { retry_count: u32, delay: Duration },
    /// Move it to the failure registry.
    Fail { retry_count: u32, reason: String },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> RetryConfig {
        self.config
    }

    /// Decides the outcome given the retry count *after* this failure was recorded.
    pub fn decide(&self, retry_count: u32, error: &AgentError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::Fail {
                retry_count,
                reason: error.to_string(),
            };
        }
        if retry_count >= self.config.max_retries {
            return RetryDecision::Fail {
                retry_count,
                reason: format!("retries exhausted after {} attempts: {}", retry_count, error),
            };
        }
        RetryDecision::Retry {
            retry_count,
            delay: self.config.retry_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExternalError;

    fn transient() -> AgentError {
        AgentError::External(ExternalError::Timeout("slow".into()))
    }

    #[test]
    fn test_third_failure_fails() {
        let policy = RetryPolicy::default();
        assert!(matches!(policy.decide(1, &transient()), RetryDecision::Retry { .. }));
        assert!(matches!(policy.decide(2, &transient()), RetryDecision::Retry { .. }));
        assert!(matches!(
            policy.decide(3, &transient()),
            RetryDecision::Fail { retry_count: 3, .. }
        ));
    }

    #[test]
    fn test_permanent_fails_immediately() {
        let policy = RetryPolicy::default();
        let decision = policy.decide(1, &AgentError::Permanent("no fetchable text".into()));
        assert!(matches!(decision, RetryDecision::Fail { retry_count: 1, .. }));
    }

    #[test]
    fn test_retry_carries_configured_delay() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 5,
            retry_delay: Duration::from_millis(250),
        });
        assert_eq!(
            policy.decide(4, &transient()),
            RetryDecision::Retry {
                retry_count: 4,
                delay: Duration::from_millis(250)
            }
        );
    }
}
