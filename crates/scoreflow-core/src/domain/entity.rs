//! Entity kinds and references.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ids::EntityId;

/// The four levels of the work hierarchy (Pillar → Area → Project → Task).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Project,
    Area,
    Pillar,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Task,
        EntityKind::Project,
        EntityKind::Area,
        EntityKind::Pillar,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Task => "task",
            EntityKind::Project => "project",
            EntityKind::Area => "area",
            EntityKind::Pillar => "pillar",
        }
    }

    /// Kinds allowed as the parent of this kind.
    ///
    /// A task normally lives in a project but may hang directly off an area.
    /// Pillars are top-level.
    pub fn parent_kinds(self) -> &'static [EntityKind] {
        match self {
            EntityKind::Task => &[EntityKind::Project, EntityKind::Area],
            EntityKind::Project => &[EntityKind::Area],
            EntityKind::Area => &[EntityKind::Pillar],
            EntityKind::Pillar => &[],
        }
    }

    /// 0 for tasks, 3 for pillars. Lower levels are recomputed first.
    pub fn level(self) -> u8 {
        match self {
            EntityKind::Task => 0,
            EntityKind::Project => 1,
            EntityKind::Area => 2,
            EntityKind::Pillar => 3,
        }
    }

    pub fn is_aggregate(self) -> bool {
        !matches!(self, EntityKind::Task)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entity kind '{0}'")]
pub struct ParseKindError(pub String);

impl FromStr for EntityKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(EntityKind::Task),
            "project" => Ok(EntityKind::Project),
            "area" => Ok(EntityKind::Area),
            "pillar" => Ok(EntityKind::Pillar),
            other => Err(ParseKindError(other.to_string())),
        }
    }
}

/// Kind + id of one entity. This is the key used by every index and store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }

    pub fn task(id: EntityId) -> Self {
        Self::new(EntityKind::Task, id)
    }

    pub fn project(id: EntityId) -> Self {
        Self::new(EntityKind::Project, id)
    }

    pub fn area(id: EntityId) -> Self {
        Self::new(EntityKind::Area, id)
    }

    pub fn pillar(id: EntityId) -> Self {
        Self::new(EntityKind::Pillar, id)
    }

    pub fn is_task(&self) -> bool {
        self.kind == EntityKind::Task
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}
