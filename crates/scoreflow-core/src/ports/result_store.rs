//! ResultStore port - short-lived job outcomes.
//!
//! Outcomes are pollable by job id until they expire; after that a lookup
//! answers `None` and the outcome must be treated as unknown. Failures are
//! also recorded per entity so callers can see why a score is not current.

use async_trait::async_trait;

use crate::domain::{EntityFailure, EntityRef, JobId, JobStatus};

/// Every `mark_*` call is a `JobPhase` transition. An illegal transition is
/// rejected and reported as `false`; a missing or expired record accepts any.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// A fresh job was published.
    async fn mark_pending(&self, job_id: JobId, entity: EntityRef) -> bool;

    /// Attempt `attempt` was leased and is about to execute. `false` means the
    /// job already finished and this delivery is a duplicate.
    async fn mark_running(&self, job_id: JobId, entity: EntityRef, attempt: u32) -> bool;

    /// Attempt `attempt` failed transiently; another one is scheduled.
    async fn mark_retrying(
        &self,
        job_id: JobId,
        entity: EntityRef,
        attempt: u32,
        error: String,
    ) -> bool;

    async fn mark_succeeded(&self, job_id: JobId, entity: EntityRef, attempts: u32) -> bool;

    async fn mark_failed(
        &self,
        job_id: JobId,
        entity: EntityRef,
        attempts: u32,
        error: String,
    ) -> bool;

    async fn get(&self, job_id: JobId) -> Option<JobStatus>;

    async fn record_entity_failure(&self, entity: EntityRef, failure: EntityFailure);

    async fn clear_entity_failure(&self, entity: EntityRef);

    async fn entity_failure(&self, entity: EntityRef) -> Option<EntityFailure>;

    /// Drop expired job outcomes. Returns how many were removed.
    async fn purge_expired(&self) -> usize;
}
