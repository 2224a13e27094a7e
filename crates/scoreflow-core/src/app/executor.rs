//! Executor - one job, start to settlement.
//!
//! # フロー
//! 1. ScoreStore::read() で現在値と version を取得
//! 2. index から children / predecessors を取得し、それぞれの score を読む
//! 3. InputSource::facts() で入力を取得（soft limit で中断可能）
//! 4. ScoreFormula::compute()（blocking pool 上で実行）
//! 5. 値が変わっていれば compare_and_write()
//!
//! Errors come back as `ExecutionError`; the worker loop hands them to the
//! decider. Structural surprises (entity deleted mid-cascade) settle as
//! `Skipped` instead of failing.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::{
    EntityRef, ExecutionError, RecalculationJob, Settlement, StoreError, WriteOutcome,
};
use crate::graph::SharedIndex;
use crate::ports::{InputSource, ScoreFormula, ScoreInputs, ScoreStore};

pub struct Executor {
    index: SharedIndex,
    store: Arc<dyn ScoreStore>,
    inputs: Arc<dyn InputSource>,
    formula: Arc<dyn ScoreFormula>,
}

fn store_error(err: StoreError) -> ExecutionError {
    ExecutionError::transient(err.to_string())
}

impl Executor {
    pub fn new(
        index: SharedIndex,
        store: Arc<dyn ScoreStore>,
        inputs: Arc<dyn InputSource>,
        formula: Arc<dyn ScoreFormula>,
    ) -> Self {
        Self {
            index,
            store,
            inputs,
            formula,
        }
    }

    /// Scores of `entities`, skipping any that vanished meanwhile.
    async fn current_scores(
        &self,
        entities: Vec<EntityRef>,
    ) -> Result<Vec<(EntityRef, f64)>, ExecutionError> {
        let mut out = Vec::with_capacity(entities.len());
        for entity in entities {
            match self.store.read(entity).await {
                Ok(score) => out.push((entity, score.value)),
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(store_error(e)),
            }
        }
        Ok(out)
    }

    /// The formula is synchronous, so it runs on the blocking pool.
    ///
    /// Aborting the job task at the hard limit does not stop a computation
    /// already on the pool: it runs to completion and its result is dropped.
    /// The worker meanwhile moves on to the next job of its queue.
    async fn compute(&self, inputs: ScoreInputs) -> Result<f64, ExecutionError> {
        let formula = Arc::clone(&self.formula);
        match tokio::task::spawn_blocking(move || formula.compute(&inputs)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(ExecutionError::transient("formula panicked")),
            Err(_) => Err(ExecutionError::transient("formula cancelled")),
        }
    }

    pub async fn execute(
        &self,
        job: &RecalculationJob,
        cancel: &CancellationToken,
    ) -> Result<Settlement, ExecutionError> {
        let entity = job.entity();

        let current = match self.store.read(entity).await {
            Ok(score) => score,
            Err(StoreError::NotFound(_)) => return Ok(Settlement::Skipped),
            Err(e) => return Err(store_error(e)),
        };

        let (children, predecessors) = {
            let index = self.index.read();
            match (index.children(entity), index.predecessors(entity)) {
                (Ok(c), Ok(p)) => (c, p),
                _ => return Ok(Settlement::Skipped),
            }
        };
        let children = self.current_scores(children).await?;
        let predecessors = self.current_scores(predecessors).await?;

        let facts = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ExecutionError::transient("soft time limit exceeded"));
            }
            facts = self.inputs.facts(entity) => facts?,
        };

        let value = self
            .compute(ScoreInputs {
                entity,
                facts,
                children,
                predecessors,
            })
            .await?;

        if !current.differs_from(value) {
            if current.written_by == Some(job.job_id) {
                debug!(job_id = %job.job_id, %entity, "value already written by this job");
                return Ok(Settlement::Replayed {
                    value: current.value,
                    version: current.version,
                });
            }
            return Ok(Settlement::Unchanged {
                value: current.value,
            });
        }

        match self
            .store
            .compare_and_write(entity, value, current.version, job.job_id)
            .await
        {
            Ok(WriteOutcome::Written { version }) => Ok(Settlement::Changed { value, version }),
            Ok(WriteOutcome::Conflict { current }) => Ok(Settlement::Conflict { current }),
            Err(StoreError::NotFound(_)) => Ok(Settlement::Skipped),
            Err(e) => Err(store_error(e)),
        }
    }
}
