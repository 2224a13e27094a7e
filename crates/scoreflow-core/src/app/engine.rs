//! Engine - 外部から見た API
//!
//! Structure changes (create, remove, move, dependencies) go through the
//! engine so the index and the score store stay in step. Each mutating call
//! plans a cascade and returns once its first wave is published; scores are
//! never awaited.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::executor::Executor;
use super::gc_loop::{GcConfig, spawn_gc_task};
use super::reaper_loop::{ReaperConfig, spawn_reaper_task};
use super::scheduler::{CascadeReceipt, Scheduler};
use super::status::{EngineStatus, QueueStatus};
use super::sweep_loop::{Sweeper, spawn_sweep_task};
use super::worker_loop::{TimeLimits, WorkerContext, WorkerGroup};
use crate::config::EngineConfig;
use crate::domain::{
    EngineError, EntityFailure, EntityId, EntityKind, EntityRef, JobId, JobStatus, Reason, Score,
    StructuralError,
};
use crate::graph::SharedIndex;
use crate::ports::{Broker, Clock, Decider, IdGenerator, ResultStore, ScoreStore};
use crate::routing::QueueName;

/// Built by `EngineBuilder`.
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) index: SharedIndex,
    pub(super) store: Arc<dyn ScoreStore>,
    pub(super) broker: Arc<dyn Broker>,
    pub(super) results: Arc<dyn ResultStore>,
    pub(super) scheduler: Arc<Scheduler>,
    pub(super) executor: Arc<Executor>,
    pub(super) decider: Arc<dyn Decider>,
    pub(super) sweeper: Arc<Sweeper>,
    pub(super) ids: Arc<dyn IdGenerator>,
    pub(super) clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    /// Add an entity with a zero score and no recomputation.
    ///
    /// For bulk loading; `create_entity` is the event-producing variant.
    pub async fn register_entity(
        &self,
        entity: EntityRef,
        parent: Option<EntityRef>,
    ) -> Result<(), EngineError> {
        self.index.write().insert(entity, parent)?;
        if let Err(e) = self.store.seed(entity).await {
            // index と store を揃える
            let _ = self.index.write().remove(entity);
            return Err(e.into());
        }
        Ok(())
    }

    /// Register a new entity and score it.
    pub async fn create_entity(
        &self,
        kind: EntityKind,
        parent: Option<EntityRef>,
    ) -> Result<(EntityRef, CascadeReceipt), EngineError> {
        let entity = EntityRef::new(kind, self.ids.entity_id());
        self.register_entity(entity, parent).await?;
        let receipt = self.scheduler.on_event(entity, Reason::Created).await?;
        Ok((entity, receipt))
    }

    /// Remove a childless entity. Its former parent and dependents are
    /// recomputed without it.
    pub async fn remove_entity(
        &self,
        entity: EntityRef,
    ) -> Result<Option<CascadeReceipt>, EngineError> {
        let (parent, dependents) = {
            let mut index = self.index.write();
            let dependents = index.dependents(entity)?;
            let parent = index.remove(entity)?;
            (parent, dependents)
        };
        self.store.remove(entity).await?;
        self.results.clear_entity_failure(entity).await;

        let seeds: Vec<_> = parent
            .into_iter()
            .map(|p| (p, Reason::EntityRemoved))
            .chain(dependents.into_iter().map(|d| (d, Reason::DependencyRemoved)))
            .collect();
        if seeds.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.scheduler.on_seeds(seeds).await?))
    }

    /// Move an entity under `new_parent`. Both the entity and its old
    /// parent chain are recomputed.
    pub async fn move_entity(
        &self,
        entity: EntityRef,
        new_parent: EntityRef,
    ) -> Result<CascadeReceipt, EngineError> {
        let old = self.index.write().reparent(entity, new_parent)?;
        let mut seeds = vec![(entity, Reason::TaskMoved)];
        if let Some(old) = old
            && old != new_parent
        {
            seeds.push((old, Reason::TaskMoved));
        }
        self.scheduler.on_seeds(seeds).await
    }

    /// `successor` starts depending on `predecessor`. Cycles are rejected
    /// before anything is published.
    pub async fn add_dependency(
        &self,
        successor: EntityRef,
        predecessor: EntityRef,
    ) -> Result<CascadeReceipt, EngineError> {
        self.index.write().add_dependency(successor, predecessor)?;
        self.scheduler
            .on_event(successor, Reason::DependencyAdded)
            .await
    }

    /// `None` when the edge did not exist.
    pub async fn remove_dependency(
        &self,
        successor: EntityRef,
        predecessor: EntityRef,
    ) -> Result<Option<CascadeReceipt>, EngineError> {
        let existed = self
            .index
            .write()
            .remove_dependency(successor, predecessor)?;
        if !existed {
            return Ok(None);
        }
        let receipt = self
            .scheduler
            .on_event(successor, Reason::DependencyRemoved)
            .await?;
        Ok(Some(receipt))
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Something about `(kind, id)` changed outside the engine.
    ///
    /// # 受け付ける reason
    /// - Created / Reprioritized: any kind
    /// - TaskCompleted / DependencyAdded / DependencyRemoved / TaskMoved: tasks
    /// - ImportanceChanged: aggregates; every descendant task is seeded too
    ///
    /// The rest are produced by the engine itself and rejected here.
    pub async fn notify_changed(
        &self,
        kind: EntityKind,
        id: EntityId,
        reason: Reason,
    ) -> Result<CascadeReceipt, EngineError> {
        let entity = EntityRef::new(kind, id);
        let unsupported = || EngineError::UnsupportedEvent {
            kind,
            reason: reason.to_string(),
        };

        let seeds = {
            let index = self.index.read();
            if !index.contains(entity) {
                return Err(StructuralError::UnknownEntity(entity).into());
            }
            match reason {
                Reason::Created | Reason::Reprioritized => vec![(entity, reason)],
                Reason::TaskCompleted
                | Reason::DependencyAdded
                | Reason::DependencyRemoved
                | Reason::TaskMoved => {
                    if !entity.is_task() {
                        return Err(unsupported());
                    }
                    vec![(entity, reason)]
                }
                Reason::ImportanceChanged => {
                    if entity.is_task() {
                        return Err(unsupported());
                    }
                    let mut seeds: Vec<_> = index
                        .descendant_tasks(entity)?
                        .into_iter()
                        .map(|t| (t, reason))
                        .collect();
                    seeds.push((entity, reason));
                    seeds
                }
                Reason::EntityRemoved
                | Reason::Sweep
                | Reason::ChildChanged
                | Reason::PredecessorChanged => return Err(unsupported()),
            }
        };
        self.scheduler.on_seeds(seeds).await
    }

    /// Rescore every task now, in batches.
    pub async fn rescore_all(&self) -> Result<Vec<CascadeReceipt>, EngineError> {
        self.sweeper.sweep().await
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// `None` once the record expired or for ids never seen.
    pub async fn get_job_outcome(&self, job_id: JobId) -> Option<JobStatus> {
        self.results.get(job_id).await
    }

    pub async fn entity_failure(&self, entity: EntityRef) -> Option<EntityFailure> {
        self.results.entity_failure(entity).await
    }

    pub async fn score(&self, entity: EntityRef) -> Result<Score, EngineError> {
        Ok(self.store.read(entity).await?)
    }

    pub async fn status(&self) -> EngineStatus {
        let mut queues = Vec::with_capacity(QueueName::ALL.len());
        for queue in QueueName::ALL {
            queues.push(QueueStatus::new(queue, self.broker.counts(queue).await));
        }
        EngineStatus {
            queues,
            active_cascades: self.scheduler.active_cascades().await,
        }
    }

    /// Poll until every queue is drained and no cascade is open.
    ///
    /// Only returns if workers are running.
    pub async fn wait_idle(&self, poll: Duration) {
        while !self.status().await.is_idle() {
            tokio::time::sleep(poll).await;
        }
    }

    // ------------------------------------------------------------------
    // Runtime
    // ------------------------------------------------------------------

    /// Spawn the workers and background loops.
    pub fn start(&self) -> EngineHandle {
        let ctx = Arc::new(WorkerContext {
            broker: self.broker.clone(),
            executor: self.executor.clone(),
            scheduler: self.scheduler.clone(),
            results: self.results.clone(),
            decider: self.decider.clone(),
            clock: self.clock.clone(),
            limits: TimeLimits {
                soft: self.config.soft_time_limit(),
                hard: self.config.hard_time_limit(),
            },
        });
        let workers = WorkerGroup::spawn(ctx, &QueueName::ALL);

        let cancel = CancellationToken::new();
        let mut tasks = vec![
            spawn_reaper_task(
                self.broker.clone(),
                ReaperConfig::from_config(&self.config),
                cancel.clone(),
            ),
            spawn_gc_task(
                self.results.clone(),
                self.scheduler.clone(),
                GcConfig::from_config(&self.config),
                cancel.clone(),
            ),
        ];
        if let Some(period) = self.config.sweep_interval() {
            tasks.push(spawn_sweep_task(
                self.sweeper.clone(),
                period,
                cancel.clone(),
            ));
        }

        info!(workers = workers.len(), loops = tasks.len(), "engine started");
        EngineHandle {
            workers,
            cancel,
            tasks,
        }
    }
}

/// Running workers and loops. Dropping the handle leaves them running.
pub struct EngineHandle {
    workers: WorkerGroup,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Stop leasing, let running jobs finish and ack, stop the loops.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.workers.shutdown_and_join().await;
        for task in self.tasks {
            let _ = task.await;
        }
        info!("engine stopped");
    }
}
