//! ScoreStore port - versioned score persistence.
//!
//! The only way to change a stored value is `compare_and_write`, which
//! succeeds only if the stored version still equals `expected_version`.

use async_trait::async_trait;

use crate::domain::{EntityRef, JobId, Score, StoreError, WriteOutcome};

#[async_trait]
pub trait ScoreStore: Send + Sync {
    /// Current value and version. `StoreError::NotFound` if never seeded.
    async fn read(&self, entity: EntityRef) -> Result<Score, StoreError>;

    /// Conditional write.
    ///
    /// - stored version == `expected_version` -> store `value` at version + 1
    /// - otherwise -> `WriteOutcome::Conflict`, nothing written
    async fn compare_and_write(
        &self,
        entity: EntityRef,
        value: f64,
        expected_version: u64,
        writer: JobId,
    ) -> Result<WriteOutcome, StoreError>;

    /// Create the default score for a new entity. Existing scores are kept.
    async fn seed(&self, entity: EntityRef) -> Result<(), StoreError>;

    /// Drop the score of a deleted entity.
    async fn remove(&self, entity: EntityRef) -> Result<(), StoreError>;
}
