//! Recalculation jobs and the reasons that trigger them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{EntityKind, EntityRef};
use super::ids::{CascadeId, EntityId, JobId};

/// Why a score is being recomputed.
///
/// The first group comes from the API layer (mutating events); the second is
/// produced by the scheduler while a cascade unfolds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    Created,
    TaskCompleted,
    Reprioritized,
    DependencyAdded,
    DependencyRemoved,
    TaskMoved,
    ImportanceChanged,
    EntityRemoved,
    Sweep,

    /// A child's score changed earlier in the same cascade.
    ChildChanged,

    /// A predecessor task's score changed earlier in the same cascade.
    PredecessorChanged,
}

impl Reason {
    pub const ALL: [Reason; 11] = [
        Reason::Created,
        Reason::TaskCompleted,
        Reason::Reprioritized,
        Reason::DependencyAdded,
        Reason::DependencyRemoved,
        Reason::TaskMoved,
        Reason::ImportanceChanged,
        Reason::EntityRemoved,
        Reason::Sweep,
        Reason::ChildChanged,
        Reason::PredecessorChanged,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Reason::Created => "created",
            Reason::TaskCompleted => "task_completed",
            Reason::Reprioritized => "reprioritized",
            Reason::DependencyAdded => "dependency_added",
            Reason::DependencyRemoved => "dependency_removed",
            Reason::TaskMoved => "task_moved",
            Reason::ImportanceChanged => "importance_changed",
            Reason::EntityRemoved => "entity_removed",
            Reason::Sweep => "sweep",
            Reason::ChildChanged => "child_changed",
            Reason::PredecessorChanged => "predecessor_changed",
        }
    }

    /// Jobs for these reasons go to the dependency queue when the entity is a task.
    pub fn is_dependency_triggered(self) -> bool {
        matches!(
            self,
            Reason::DependencyAdded | Reason::DependencyRemoved | Reason::PredecessorChanged
        )
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown reason '{0}'")]
pub struct ParseReasonError(pub String);

impl FromStr for Reason {
    type Err = ParseReasonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Reason::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| ParseReasonError(s.to_string()))
    }
}

/// One unit of recomputation work for one entity.
///
/// Envelopes are immutable: a retry produces a new envelope with the same
/// `job_id` and `attempt + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalculationJob {
    pub job_id: JobId,
    pub entity_kind: EntityKind,
    pub entity_id: EntityId,
    pub reason: Reason,
    pub enqueued_at: DateTime<Utc>,

    /// 1 for the first delivery.
    pub attempt: u32,

    /// Cascade this job belongs to, if it was planned by the scheduler.
    pub cascade_id: Option<CascadeId>,
}

impl RecalculationJob {
    pub fn new(
        job_id: JobId,
        entity: EntityRef,
        reason: Reason,
        cascade_id: Option<CascadeId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            entity_kind: entity.kind,
            entity_id: entity.id,
            reason,
            enqueued_at: now,
            attempt: 1,
            cascade_id,
        }
    }

    pub fn entity(&self) -> EntityRef {
        EntityRef::new(self.entity_kind, self.entity_id)
    }

    /// Envelope for the next attempt.
    pub fn next_attempt(&self, now: DateTime<Utc>) -> Self {
        Self {
            attempt: self.attempt + 1,
            enqueued_at: now,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_round_trips_through_str() {
        for reason in Reason::ALL {
            assert_eq!(reason.as_str().parse::<Reason>().unwrap(), reason);
        }
        assert!("exploded".parse::<Reason>().is_err());
    }

    #[test]
    fn reason_serde_matches_as_str() {
        let json = serde_json::to_string(&Reason::ImportanceChanged).unwrap();
        assert_eq!(json, "\"importance_changed\"");
    }

    #[test]
    fn next_attempt_keeps_identity() {
        let job = RecalculationJob::new(
            JobId::from_u128(1),
            EntityRef::task(EntityId::from_u128(2)),
            Reason::TaskCompleted,
            None,
            Utc::now(),
        );
        let retry = job.next_attempt(Utc::now());
        assert_eq!(retry.job_id, job.job_id);
        assert_eq!(retry.entity(), job.entity());
        assert_eq!(retry.attempt, 2);
    }
}
