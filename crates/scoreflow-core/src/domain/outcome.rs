//! Job lifecycle, settlements and the externally visible job status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::EntityRef;
use super::ids::JobId;

/// Execution phase of one job, as the result store tracks it.
///
/// State transitions:
/// - Pending -> Running -> Succeeded
/// - Pending -> Running -> Retrying -> Running (until max attempts)
/// - Pending -> Running -> Failed
/// - Running -> Running: the broker redelivered an unacknowledged attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Pending,
    Running,
    Retrying,
    Succeeded,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Succeeded | JobPhase::Failed)
    }

    pub fn can_transition_to(self, next: JobPhase) -> bool {
        use JobPhase::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Running)
                | (Running, Succeeded)
                | (Running, Retrying)
                | (Running, Failed)
                | (Retrying, Running)
        )
    }

    /// What the result interface reports for this phase.
    pub fn visible_state(self) -> JobState {
        match self {
            JobPhase::Pending | JobPhase::Running | JobPhase::Retrying => JobState::Pending,
            JobPhase::Succeeded => JobState::Succeeded,
            JobPhase::Failed => JobState::Failed,
        }
    }
}

/// State as seen by the API layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Succeeded,
    Failed,
}

/// Pollable outcome of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub entity: EntityRef,
    pub state: JobState,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Failure recorded against an entity after its job gave up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityFailure {
    pub job_id: JobId,
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

/// How a job ended. Drives both the result store and propagation.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// New value written.
    Changed { value: f64, version: u64 },

    /// Recomputed value equals the stored one; nothing written.
    Unchanged { value: f64 },

    /// The stored value was already written by this very job (redelivery).
    Replayed { value: f64, version: u64 },

    /// Someone else advanced the version first; result discarded.
    Conflict { current: u64 },

    /// The entity disappeared before the job ran.
    Skipped,

    /// Gave up (terminal error or retries exhausted).
    Failed { error: String },
}

impl Settlement {
    /// The job read its inputs and ran the formula.
    pub fn computed(&self) -> bool {
        matches!(
            self,
            Settlement::Changed { .. } | Settlement::Unchanged { .. } | Settlement::Replayed { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Settlement::Changed { .. } => "changed",
            Settlement::Unchanged { .. } => "unchanged",
            Settlement::Replayed { .. } => "replayed",
            Settlement::Conflict { .. } => "conflict",
            Settlement::Skipped => "skipped",
            Settlement::Failed { .. } => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrying_is_visible_as_pending() {
        assert_eq!(JobPhase::Retrying.visible_state(), JobState::Pending);
        assert_eq!(JobPhase::Failed.visible_state(), JobState::Failed);
    }

    #[test]
    fn terminal_phases_do_not_transition() {
        for next in [
            JobPhase::Pending,
            JobPhase::Running,
            JobPhase::Retrying,
            JobPhase::Succeeded,
            JobPhase::Failed,
        ] {
            assert!(!JobPhase::Succeeded.can_transition_to(next));
            assert!(!JobPhase::Failed.can_transition_to(next));
        }
        assert!(JobPhase::Running.can_transition_to(JobPhase::Retrying));
        assert!(JobPhase::Retrying.can_transition_to(JobPhase::Running));
        assert!(JobPhase::Running.can_transition_to(JobPhase::Running));
        assert!(!JobPhase::Pending.can_transition_to(JobPhase::Succeeded));
        assert!(!JobPhase::Retrying.can_transition_to(JobPhase::Failed));
    }

    #[test]
    fn only_computed_settlements_count_as_computed() {
        assert!(Settlement::Unchanged { value: 1.0 }.computed());
        assert!(
            Settlement::Replayed {
                value: 1.0,
                version: 2
            }
            .computed()
        );
        assert!(!Settlement::Skipped.computed());
        assert!(!Settlement::Conflict { current: 3 }.computed());
        assert!(!Settlement::Failed { error: "x".into() }.computed());
    }

    #[test]
    fn job_state_serializes_snake_case() {
        let s = serde_json::to_string(&JobState::Succeeded).unwrap();
        assert_eq!(s, "\"succeeded\"");
    }
}
