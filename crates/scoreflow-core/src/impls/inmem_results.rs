//! InMemoryResultStore - 開発用の result backend
//!
//! Each record carries its own expiry (`updated_at + expiry`), refreshed on
//! every state change. Expired records read as `None` even before the GC loop
//! purges them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{EntityFailure, EntityRef, JobId, JobPhase, JobStatus};
use crate::ports::{Clock, ResultStore};

struct Record {
    phase: JobPhase,
    status: JobStatus,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Record>,
    failures: HashMap<EntityRef, EntityFailure>,
}

pub struct InMemoryResultStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
    expiry: chrono::Duration,
}

impl InMemoryResultStore {
    pub fn new(clock: Arc<dyn Clock>, expiry: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
            expiry: chrono::Duration::from_std(expiry).unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Move `job_id` to `next`. `last_error: None` keeps the previous error
    /// while the job is still live and clears it once it succeeds.
    async fn transition(
        &self,
        job_id: JobId,
        entity: EntityRef,
        next: JobPhase,
        attempts: u32,
        last_error: Option<String>,
    ) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let previous = state.jobs.get(&job_id).filter(|r| r.expires_at > now);
        let carried = match previous {
            Some(record) if !record.phase.can_transition_to(next) => {
                if record.phase.is_terminal() {
                    debug!(%job_id, from = ?record.phase, to = ?next, "job already settled");
                } else {
                    warn!(%job_id, from = ?record.phase, to = ?next, "illegal job transition");
                }
                return false;
            }
            Some(record) if next != JobPhase::Succeeded => record.status.last_error.clone(),
            _ => None,
        };

        let record = Record {
            phase: next,
            status: JobStatus {
                job_id,
                entity,
                state: next.visible_state(),
                attempts,
                last_error: last_error.or(carried),
                updated_at: now,
            },
            expires_at: now.checked_add_signed(self.expiry).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        state.jobs.insert(job_id, record);
        true
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn mark_pending(&self, job_id: JobId, entity: EntityRef) -> bool {
        self.transition(job_id, entity, JobPhase::Pending, 0, None)
            .await
    }

    async fn mark_running(&self, job_id: JobId, entity: EntityRef, attempt: u32) -> bool {
        self.transition(job_id, entity, JobPhase::Running, attempt, None)
            .await
    }

    async fn mark_retrying(
        &self,
        job_id: JobId,
        entity: EntityRef,
        attempt: u32,
        error: String,
    ) -> bool {
        self.transition(job_id, entity, JobPhase::Retrying, attempt, Some(error))
            .await
    }

    async fn mark_succeeded(&self, job_id: JobId, entity: EntityRef, attempts: u32) -> bool {
        self.transition(job_id, entity, JobPhase::Succeeded, attempts, None)
            .await
    }

    async fn mark_failed(
        &self,
        job_id: JobId,
        entity: EntityRef,
        attempts: u32,
        error: String,
    ) -> bool {
        self.transition(job_id, entity, JobPhase::Failed, attempts, Some(error))
            .await
    }

    async fn get(&self, job_id: JobId) -> Option<JobStatus> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        state
            .jobs
            .get(&job_id)
            .filter(|r| r.expires_at > now)
            .map(|r| r.status.clone())
    }

    async fn record_entity_failure(&self, entity: EntityRef, failure: EntityFailure) {
        self.state.lock().await.failures.insert(entity, failure);
    }

    async fn clear_entity_failure(&self, entity: EntityRef) {
        self.state.lock().await.failures.remove(&entity);
    }

    async fn entity_failure(&self, entity: EntityRef) -> Option<EntityFailure> {
        self.state.lock().await.failures.get(&entity).cloned()
    }

    async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let before = state.jobs.len();
        state.jobs.retain(|_, r| r.expires_at > now);
        before - state.jobs.len()
    }
}
