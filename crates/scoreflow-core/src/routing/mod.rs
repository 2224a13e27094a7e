//! Job routing.
//!
//! `route` is a static, total function from (kind, reason) to one of four
//! fixed queues. Queue names are stable strings so deployments agree on them.

pub mod wire;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::{EntityKind, Reason};

pub use wire::{WireError, WireMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QueueName {
    #[serde(rename = "scoring.task")]
    TaskLeaf,
    #[serde(rename = "scoring.task_dependency")]
    TaskDependency,
    #[serde(rename = "scoring.area")]
    Area,
    #[serde(rename = "scoring.project")]
    Project,
}

impl QueueName {
    pub const ALL: [QueueName; 4] = [
        QueueName::TaskLeaf,
        QueueName::TaskDependency,
        QueueName::Area,
        QueueName::Project,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::TaskLeaf => "scoring.task",
            QueueName::TaskDependency => "scoring.task_dependency",
            QueueName::Area => "scoring.area",
            QueueName::Project => "scoring.project",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown queue '{0}'")]
pub struct ParseQueueError(pub String);

impl FromStr for QueueName {
    type Err = ParseQueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueName::ALL
            .into_iter()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| ParseQueueError(s.to_string()))
    }
}

/// Queue for a job on `kind` triggered by `reason`.
///
/// Pillar aggregates share the area queue: both are upstream aggregates and
/// neither should wait behind task traffic.
pub fn route(kind: EntityKind, reason: Reason) -> QueueName {
    match kind {
        EntityKind::Task if reason.is_dependency_triggered() => QueueName::TaskDependency,
        EntityKind::Task => QueueName::TaskLeaf,
        EntityKind::Project => QueueName::Project,
        EntityKind::Area | EntityKind::Pillar => QueueName::Area,
    }
}

pub const TASK_SCORE: &str = "scoring.recalculate_task_score";
pub const DEPENDENT_TASK: &str = "scoring.recalculate_dependent_task";
pub const PROJECT_SCORE: &str = "scoring.recalculate_project_score";
pub const AREA_SCORE: &str = "scoring.recalculate_area_score";

/// Task name carried in the wire message. Mirrors the queue choice.
pub fn task_name(kind: EntityKind, reason: Reason) -> &'static str {
    match route(kind, reason) {
        QueueName::TaskLeaf => TASK_SCORE,
        QueueName::TaskDependency => DEPENDENT_TASK,
        QueueName::Project => PROJECT_SCORE,
        QueueName::Area => AREA_SCORE,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(EntityKind::Task, Reason::TaskCompleted, QueueName::TaskLeaf)]
    #[case(EntityKind::Task, Reason::Created, QueueName::TaskLeaf)]
    #[case(EntityKind::Task, Reason::Sweep, QueueName::TaskLeaf)]
    #[case(EntityKind::Task, Reason::DependencyAdded, QueueName::TaskDependency)]
    #[case(EntityKind::Task, Reason::DependencyRemoved, QueueName::TaskDependency)]
    #[case(EntityKind::Task, Reason::PredecessorChanged, QueueName::TaskDependency)]
    #[case(EntityKind::Project, Reason::ChildChanged, QueueName::Project)]
    #[case(EntityKind::Project, Reason::DependencyAdded, QueueName::Project)]
    #[case(EntityKind::Area, Reason::ImportanceChanged, QueueName::Area)]
    #[case(EntityKind::Pillar, Reason::ChildChanged, QueueName::Area)]
    fn route_table(#[case] kind: EntityKind, #[case] reason: Reason, #[case] expected: QueueName) {
        assert_eq!(route(kind, reason), expected);
    }

    #[test]
    fn route_is_total() {
        for kind in EntityKind::ALL {
            for reason in Reason::ALL {
                let queue = route(kind, reason);
                assert!(QueueName::ALL.contains(&queue));
                assert!(!task_name(kind, reason).is_empty());
            }
        }
    }

    #[test]
    fn queue_names_round_trip() {
        for q in QueueName::ALL {
            assert_eq!(q.as_str().parse::<QueueName>().unwrap(), q);
            assert_eq!(serde_json::to_string(&q).unwrap(), format!("\"{q}\""));
        }
    }

    #[test]
    fn dependent_tasks_get_their_own_task_name() {
        assert_eq!(
            task_name(EntityKind::Task, Reason::PredecessorChanged),
            DEPENDENT_TASK
        );
        assert_eq!(task_name(EntityKind::Pillar, Reason::Sweep), AREA_SCORE);
    }
}
