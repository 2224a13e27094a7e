//! Errors and their operational classification.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::entity::{EntityKind, EntityRef};
use super::ids::EntityId;
use crate::config::ConfigError;
use crate::ports::broker::BrokerError;
use crate::routing::wire::WireError;

/// Classification of a job execution error.
///
/// - Transient: input unreadable, store unavailable, time limit hit. Retried.
/// - Terminal: the formula rejected its inputs. Never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Terminal,
}

/// Error raised while executing one recalculation job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ExecutionError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Terminal,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ErrorKind::Transient => "transient",
            ErrorKind::Terminal => "terminal",
        };
        write!(f, "{kind}: {}", self.message)
    }
}

/// Rejected at the mutation boundary; never reaches a queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("unknown entity {0}")]
    UnknownEntity(EntityRef),

    #[error("entity {0} already exists")]
    AlreadyExists(EntityRef),

    #[error("{child} cannot be placed under {parent:?}")]
    InvalidParent {
        child: EntityRef,
        parent: Option<EntityRef>,
    },

    #[error("{0} still has children")]
    HasChildren(EntityRef),

    #[error("dependency edges are only allowed between tasks, got {0}")]
    NotATask(EntityRef),

    #[error("dependency would create a cycle: {path:?}")]
    Cycle { path: Vec<EntityId> },
}

/// Score store failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("no score stored for {0}")]
    NotFound(EntityRef),

    #[error("score store unavailable: {0}")]
    Unavailable(String),
}

/// Error surfaced by the engine façade.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{kind} entities cannot receive '{reason}' events")]
    UnsupportedEvent { kind: EntityKind, reason: String },
}
