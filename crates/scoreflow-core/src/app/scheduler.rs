//! Propagation scheduler.
//!
//! Turns events into cascade plans and settlements into the next wave of
//! jobs. Plans are stored before their first job is published, so a fast
//! worker always finds the plan of the job it just finished.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::cascade::{CascadePlan, NodeOutcome, Release};
use crate::domain::{
    CascadeId, EngineError, EntityRef, RecalculationJob, Reason, Settlement, StructuralError,
};
use crate::graph::SharedIndex;
use crate::ports::{Broker, Clock, IdGenerator, ResultStore};
use crate::routing::{route, wire};

/// What a triggering call gets back: ids to poll, nothing more.
#[derive(Debug, Clone, Serialize)]
pub struct CascadeReceipt {
    pub cascade_id: CascadeId,

    /// Jobs published right away.
    pub jobs: Vec<RecalculationJob>,

    /// Size of the closure (entities that may be recomputed).
    pub planned: usize,
}

pub struct Scheduler {
    index: SharedIndex,
    broker: Arc<dyn Broker>,
    results: Arc<dyn ResultStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    cascades: Mutex<HashMap<CascadeId, CascadePlan>>,
}

impl Scheduler {
    pub fn new(
        index: SharedIndex,
        broker: Arc<dyn Broker>,
        results: Arc<dyn ResultStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            index,
            broker,
            results,
            ids,
            clock,
            cascades: Mutex::new(HashMap::new()),
        }
    }

    /// Plan and start the cascade for a single changed entity.
    pub async fn on_event(
        &self,
        entity: EntityRef,
        reason: Reason,
    ) -> Result<CascadeReceipt, EngineError> {
        self.on_seeds(vec![(entity, reason)]).await
    }

    /// Plan and start one cascade for several seeds at once.
    pub async fn on_seeds(
        &self,
        seeds: Vec<(EntityRef, Reason)>,
    ) -> Result<CascadeReceipt, EngineError> {
        let cascade_id = self.ids.cascade_id();
        let mut plan = {
            let index = self.index.read();
            CascadePlan::build(cascade_id, &seeds, &index)?
        };
        let planned = plan.len();
        let initial = plan.start();
        let jobs = self.jobs_for(cascade_id, &initial);

        info!(
            cascade = %cascade_id,
            seeds = seeds.len(),
            planned,
            initial = jobs.len(),
            "cascade planned"
        );

        self.cascades.lock().await.insert(cascade_id, plan);
        if let Err(e) = self.publish(&jobs).await {
            self.cascades.lock().await.remove(&cascade_id);
            return Err(e);
        }

        Ok(CascadeReceipt {
            cascade_id,
            jobs,
            planned,
        })
    }

    /// Report a finished job. Publishes and returns whatever it released.
    pub async fn on_settled(
        &self,
        job: &RecalculationJob,
        settlement: &Settlement,
    ) -> Result<Vec<RecalculationJob>, EngineError> {
        let entity = job.entity();
        let outcome = NodeOutcome::from_settlement(settlement);

        let tracked = match job.cascade_id {
            Some(cascade_id) => {
                let mut cascades = self.cascades.lock().await;
                match cascades.get_mut(&cascade_id) {
                    Some(plan) => {
                        let released = plan.settle(entity, outcome);
                        let complete = plan.is_complete();
                        if complete {
                            cascades.remove(&cascade_id);
                            info!(cascade = %cascade_id, "cascade complete");
                        }
                        Some(released)
                    }
                    None => None,
                }
            }
            None => None,
        };

        let released = match tracked {
            Some(released) if !released.ignored => released,
            // only a fresh write is news; a replay was already reported
            _ if matches!(settlement, Settlement::Changed { .. }) => {
                return self.follow_up(entity).await;
            }
            _ => return Ok(Vec::new()),
        };

        for halted in &released.halted {
            warn!(
                cascade = ?job.cascade_id,
                entity = %halted,
                failed = %entity,
                "recalculation halted by upstream failure"
            );
        }
        if !released.suppressed.is_empty() {
            debug!(
                cascade = ?job.cascade_id,
                count = released.suppressed.len(),
                "unchanged inputs, recalculation suppressed"
            );
        }

        let Some(cascade_id) = job.cascade_id else {
            return Ok(Vec::new());
        };
        let jobs = self.jobs_for(cascade_id, &released.enqueue);
        self.publish(&jobs).await?;
        Ok(jobs)
    }

    /// A change nobody planned for: start a fresh cascade from its downstream.
    async fn follow_up(&self, entity: EntityRef) -> Result<Vec<RecalculationJob>, EngineError> {
        let lookup = self.index.read().downstream(entity);
        let downstream = match lookup {
            Ok(d) => d,
            Err(StructuralError::UnknownEntity(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if downstream.is_empty() {
            return Ok(Vec::new());
        }
        let seeds = downstream
            .into_iter()
            .map(|e| {
                let reason = if e.is_task() {
                    Reason::PredecessorChanged
                } else {
                    Reason::ChildChanged
                };
                (e, reason)
            })
            .collect();
        debug!(%entity, "untracked change, starting follow-up cascade");
        Ok(self.on_seeds(seeds).await?.jobs)
    }

    fn jobs_for(&self, cascade_id: CascadeId, releases: &[Release]) -> Vec<RecalculationJob> {
        let now = self.clock.now();
        releases
            .iter()
            .map(|r| {
                RecalculationJob::new(self.ids.job_id(), r.entity, r.reason, Some(cascade_id), now)
            })
            .collect()
    }

    /// Record each job as pending, then publish it to its queue.
    async fn publish(&self, jobs: &[RecalculationJob]) -> Result<(), EngineError> {
        for job in jobs {
            let queue = route(job.entity_kind, job.reason);
            let payload = wire::encode(job)?;
            self.results.mark_pending(job.job_id, job.entity()).await;
            self.broker.publish(queue, payload).await?;
            debug!(job_id = %job.job_id, entity = %job.entity(), %queue, "job published");
        }
        Ok(())
    }

    /// Drop plans older than `max_age`. Returns how many were dropped.
    ///
    /// A plan only outlives its jobs if a release could not be published or
    /// a job keeps failing past the age limit. Whatever a dropped plan still
    /// owes (a parent that already saw a child change, an unreleased seed)
    /// is planned again as one fresh cascade.
    pub async fn prune_cascades(&self, max_age: Duration) -> Result<usize, EngineError> {
        let mut owed = Vec::new();
        let pruned = {
            let mut cascades = self.cascades.lock().await;
            let before = cascades.len();
            cascades.retain(|id, plan| {
                let keep = plan.age() < max_age;
                if !keep {
                    let work = plan.owed();
                    warn!(cascade = %id, owed = work.len(), "dropping stale cascade");
                    owed.extend(work);
                }
                keep
            });
            before - cascades.len()
        };

        // 削除済みの entity は再計画しない
        owed.retain(|(entity, _)| self.index.read().contains(*entity));
        if !owed.is_empty() {
            let receipt = self.on_seeds(owed).await?;
            info!(cascade = %receipt.cascade_id, planned = receipt.planned, "owed work replanned");
        }
        Ok(pruned)
    }

    pub async fn active_cascades(&self) -> usize {
        self.cascades.lock().await.len()
    }
}
