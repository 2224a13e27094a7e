//! Versioned score values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::JobId;

/// Two values closer than this are treated as equal (change suppression).
pub const SCORE_EPSILON: f64 = 1e-9;

/// The derived value attached to one entity.
///
/// `version` starts at 0 for a freshly seeded entity and grows by one on every
/// successful conditional write. It never decreases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub value: f64,
    pub version: u64,
    pub updated_at: DateTime<Utc>,

    /// Job that produced the current value (`None` for a seeded score).
    pub written_by: Option<JobId>,
}

impl Score {
    /// Default score for a newly created entity.
    pub fn seed(now: DateTime<Utc>) -> Self {
        Self {
            value: 0.0,
            version: 0,
            updated_at: now,
            written_by: None,
        }
    }

    pub fn differs_from(&self, value: f64) -> bool {
        (self.value - value).abs() > SCORE_EPSILON
    }
}

/// Result of a conditional (optimistic-lock) write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Stored; the score now has `version`.
    Written { version: u64 },

    /// The stored version had moved on; nothing was written.
    Conflict { current: u64 },
}
