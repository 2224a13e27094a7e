//! SweepLoop - 全 Task の定期再計算
//!
//! Every task is seeded with `Reason::Sweep`, `batch_size` tasks per cascade.
//! Aggregates follow through the normal release rule, so an unchanged batch
//! costs one job per task and nothing upstream.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::scheduler::{CascadeReceipt, Scheduler};
use crate::domain::{EngineError, EntityKind, Reason};
use crate::graph::SharedIndex;

pub struct Sweeper {
    index: SharedIndex,
    scheduler: Arc<Scheduler>,
    batch_size: usize,
}

impl Sweeper {
    pub fn new(index: SharedIndex, scheduler: Arc<Scheduler>, batch_size: usize) -> Self {
        Self {
            index,
            scheduler,
            batch_size: batch_size.max(1),
        }
    }

    /// Seed every task, one cascade per batch.
    pub async fn sweep(&self) -> Result<Vec<CascadeReceipt>, EngineError> {
        let tasks = self.index.read().entities_of_kind(EntityKind::Task);
        let mut receipts = Vec::with_capacity(tasks.len().div_ceil(self.batch_size));
        for batch in tasks.chunks(self.batch_size) {
            let seeds = batch.iter().map(|&t| (t, Reason::Sweep)).collect();
            receipts.push(self.scheduler.on_seeds(seeds).await?);
        }
        info!(
            tasks = tasks.len(),
            cascades = receipts.len(),
            "sweep published"
        );
        Ok(receipts)
    }
}

/// The first sweep runs one `period` after start.
pub fn spawn_sweep_task(
    sweeper: Arc<Sweeper>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_secs = period.as_secs(), "sweep task started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("sweep task shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = sweeper.sweep().await {
                        warn!(error = %e, "sweep failed");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityId, EntityRef};
    use crate::graph::HierarchyIndex;
    use crate::impls::InMemoryResultStore;
    use crate::ports::{Broker, SystemClock, UlidGenerator};
    use crate::queue::InMemoryBroker;
    use crate::routing::QueueName;

    fn setup(tasks: u128) -> (Arc<InMemoryBroker>, Sweeper) {
        let mut index = HierarchyIndex::new();
        let pillar = EntityRef::pillar(EntityId::from_u128(1));
        let area = EntityRef::area(EntityId::from_u128(2));
        index.insert(pillar, None).unwrap();
        index.insert(area, Some(pillar)).unwrap();
        for n in 0..tasks {
            index
                .insert(EntityRef::task(EntityId::from_u128(100 + n)), Some(area))
                .unwrap();
        }
        let index = SharedIndex::new(index);
        let broker = Arc::new(InMemoryBroker::new(1));
        let scheduler = Arc::new(Scheduler::new(
            index.clone(),
            broker.clone(),
            Arc::new(InMemoryResultStore::new(
                Arc::new(SystemClock),
                Duration::from_secs(60),
            )),
            Arc::new(UlidGenerator::new(SystemClock)),
            Arc::new(SystemClock),
        ));
        (broker, Sweeper::new(index, scheduler, 2))
    }

    #[tokio::test]
    async fn tasks_are_seeded_in_batches() {
        let (broker, sweeper) = setup(5);

        let receipts = sweeper.sweep().await.unwrap();

        assert_eq!(receipts.len(), 3);
        assert_eq!(
            receipts.iter().map(|r| r.jobs.len()).collect::<Vec<_>>(),
            vec![2, 2, 1]
        );
        assert!(
            receipts
                .iter()
                .flat_map(|r| &r.jobs)
                .all(|j| j.reason == Reason::Sweep)
        );
        assert_eq!(broker.counts(QueueName::TaskLeaf).await.ready, 5);
        assert_eq!(broker.counts(QueueName::Area).await.ready, 0);
    }

    #[tokio::test]
    async fn empty_hierarchy_sweeps_nothing() {
        let (_, sweeper) = setup(0);
        assert!(sweeper.sweep().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_sweeps_once_per_period() {
        let (broker, sweeper) = setup(1);
        let cancel = CancellationToken::new();
        let task = spawn_sweep_task(Arc::new(sweeper), Duration::from_secs(100), cancel.clone());

        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(broker.counts(QueueName::TaskLeaf).await.ready, 0);

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(broker.counts(QueueName::TaskLeaf).await.ready, 1);

        cancel.cancel();
        task.await.unwrap();
    }
}
