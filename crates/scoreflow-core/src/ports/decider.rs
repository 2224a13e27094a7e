//! Decider port - 失敗した実行から次のアクションを決める
//!
//! A decider is a pure function of (job, error): no side effects, the worker
//! loop carries out whatever it returns.

use std::time::Duration;

use crate::domain::{ExecutionError, RecalculationJob};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Publish `job.next_attempt()` after `delay`.
    Retry { delay: Duration, next_attempt: u32 },

    /// Give up; record the failure.
    Fail { reason: String },
}

pub trait Decider: Send + Sync {
    fn decide(&self, job: &RecalculationJob, error: &ExecutionError) -> Decision;
}
