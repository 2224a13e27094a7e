//! Retry policy: fixed delay, bounded attempts.

use std::time::Duration;

use crate::config::EngineConfig;
use crate::domain::{ExecutionError, RecalculationJob};
use crate::ports::{Decider, Decision};

/// Retry policy for failed jobs.
///
/// The delay is fixed: a job that failed transiently is republished to the
/// tail of its queue after `delay`, whatever the attempt number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,

    /// Total attempts including the first one.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(60),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            delay: config.retry_delay(),
            max_attempts: config.max_attempts,
        }
    }

    pub fn next_delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Decider backed by a `RetryPolicy`.
///
/// - terminal error -> Fail immediately
/// - transient error, attempt < max -> Retry with attempt + 1
/// - transient error, attempt >= max -> Fail ("retries exhausted")
#[derive(Debug, Clone, Default)]
pub struct DefaultDecider {
    policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, job: &RecalculationJob, error: &ExecutionError) -> Decision {
        if !error.is_transient() {
            return Decision::Fail {
                reason: error.to_string(),
            };
        }
        if job.attempt >= self.policy.max_attempts {
            return Decision::Fail {
                reason: format!(
                    "retries exhausted after {} attempts: {error}",
                    job.attempt
                ),
            };
        }
        Decision::Retry {
            delay: self.policy.next_delay(job.attempt),
            next_attempt: job.attempt + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rstest::rstest;

    use super::*;
    use crate::domain::{EntityId, EntityRef, JobId, Reason};

    fn job_at(attempt: u32) -> RecalculationJob {
        let mut job = RecalculationJob::new(
            JobId::from_u128(1),
            EntityRef::task(EntityId::from_u128(1)),
            Reason::TaskCompleted,
            None,
            Utc::now(),
        );
        job.attempt = attempt;
        job
    }

    #[test]
    fn default_policy_matches_documented_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay, Duration::from_secs(60));
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy, RetryPolicy::from_config(&EngineConfig::default()));
    }

    #[test]
    fn delay_is_fixed() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(1), policy.next_delay(2));
    }

    #[rstest]
    #[case(1, true)]
    #[case(2, true)]
    #[case(3, false)]
    #[case(4, false)]
    fn transient_errors_retry_until_max(#[case] attempt: u32, #[case] retries: bool) {
        let decider = DefaultDecider::default();
        let decision = decider.decide(&job_at(attempt), &ExecutionError::transient("db down"));
        match decision {
            Decision::Retry {
                delay,
                next_attempt,
            } => {
                assert!(retries);
                assert_eq!(delay, Duration::from_secs(60));
                assert_eq!(next_attempt, attempt + 1);
            }
            Decision::Fail { reason } => {
                assert!(!retries);
                assert!(reason.contains("retries exhausted"));
            }
        }
    }

    #[test]
    fn terminal_errors_never_retry() {
        let decider = DefaultDecider::default();
        let decision = decider.decide(&job_at(1), &ExecutionError::terminal("negative weight"));
        assert_eq!(
            decision,
            Decision::Fail {
                reason: "terminal: negative weight".into()
            }
        );
    }
}
