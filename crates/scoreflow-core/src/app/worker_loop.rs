//! WorkerLoop - one consumer per queue.
//!
//! # フロー
//! 1. Broker::lease() で 1 件取得（prefetch 1 なので同じ queue の次の job は待つ）
//! 2. wire::decode() で job を復元
//! 3. ResultStore に running を記録（完了済みなら重複配送として ack のみ）
//! 4. Executor::execute() を soft / hard time limit 付きで実行
//! 5. 成功 -> Scheduler に通知 -> ResultStore に記録
//!    失敗 -> Decider -> retry（遅延 publish）または failed を記録
//! 6. ここまで終わってから ack（late acknowledgment）
//!
//! A worker that dies between lease and ack drops its delivery, and the
//! broker hands the message out again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::executor::Executor;
use super::scheduler::Scheduler;
use crate::domain::{EntityFailure, ExecutionError, RecalculationJob, Settlement};
use crate::ports::{Broker, BrokerError, Clock, Decider, Decision, Delivery, ResultStore};
use crate::routing::{QueueName, route, wire};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeLimits {
    /// Cooperative cancellation is requested after this long.
    pub soft: Duration,
    /// The execution is abandoned after this long.
    pub hard: Duration,
}

/// Everything a worker needs, shared by all workers.
pub struct WorkerContext {
    pub broker: Arc<dyn Broker>,
    pub executor: Arc<Executor>,
    pub scheduler: Arc<Scheduler>,
    pub results: Arc<dyn ResultStore>,
    pub decider: Arc<dyn Decider>,
    pub clock: Arc<dyn Clock>,
    pub limits: TimeLimits,
}

/// Worker group handle.
/// - `request_shutdown()` で lease 待ちのワーカーが止まる
/// - 実行中の job は最後まで走り、ack してから抜ける
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn one worker per queue.
    pub fn spawn(ctx: Arc<WorkerContext>, queues: &[QueueName]) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(queues.len());
        for &queue in queues {
            let ctx = Arc::clone(&ctx);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(queue, ctx, &mut rx).await;
            });
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new leases.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

async fn worker_loop(
    queue: QueueName,
    ctx: Arc<WorkerContext>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    info!(%queue, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // lease は「待つ」ので shutdown と競合させる
        let leased = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            leased = ctx.broker.lease(queue) => leased,
        };

        match leased {
            Ok(delivery) => process(&ctx, delivery).await,
            Err(BrokerError::Closed) => break,
            Err(e) => {
                warn!(%queue, error = %e, "lease failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
    info!(%queue, "worker stopped");
}

/// Handle one delivery through to ack.
pub async fn process(ctx: &WorkerContext, delivery: Box<dyn Delivery>) {
    let queue = delivery.queue();
    let job = match wire::decode(delivery.payload()) {
        Ok(job) => job,
        Err(e) => {
            // 再配送しても直らないので捨てる
            error!(%queue, error = %e, payload = delivery.payload(), "dropping undecodable message");
            ack(delivery).await;
            return;
        }
    };

    debug!(
        job_id = %job.job_id,
        entity = %job.entity(),
        attempt = job.attempt,
        redelivered = delivery.redelivered(),
        "job started"
    );

    if !ctx
        .results
        .mark_running(job.job_id, job.entity(), job.attempt)
        .await
    {
        // 完了済み job の再配送: 実行せずに ack
        debug!(job_id = %job.job_id, "duplicate delivery of a finished job");
        ack(delivery).await;
        return;
    }

    // scheduler に先に知らせる: 記録の前に落ちても再配送で release できる
    match run_with_limits(ctx, &job).await {
        Ok(settlement) => {
            debug!(job_id = %job.job_id, outcome = settlement.label(), "job settled");
            notify_scheduler(ctx, &job, &settlement).await;
            if settlement.computed() {
                ctx.results.clear_entity_failure(job.entity()).await;
            }
            ctx.results
                .mark_succeeded(job.job_id, job.entity(), job.attempt)
                .await;
        }
        Err(err) => match ctx.decider.decide(&job, &err) {
            Decision::Retry {
                delay,
                next_attempt,
            } => {
                let next = job.next_attempt(ctx.clock.now());
                debug_assert_eq!(next.attempt, next_attempt);
                warn!(
                    job_id = %job.job_id,
                    entity = %job.entity(),
                    attempt = job.attempt,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "job failed, retry scheduled"
                );
                ctx.results
                    .mark_retrying(job.job_id, job.entity(), job.attempt, err.to_string())
                    .await;
                if let Err(e) = publish_retry(ctx, &next, delay).await {
                    // ack しない: drop で同じ attempt が再配送される
                    error!(job_id = %job.job_id, error = %e, "could not schedule retry");
                    return;
                }
            }
            Decision::Fail { reason } => {
                error!(
                    job_id = %job.job_id,
                    entity = %job.entity(),
                    attempt = job.attempt,
                    error = %reason,
                    "job failed"
                );
                ctx.results
                    .record_entity_failure(
                        job.entity(),
                        EntityFailure {
                            job_id: job.job_id,
                            error: reason.clone(),
                            attempts: job.attempt,
                            failed_at: ctx.clock.now(),
                        },
                    )
                    .await;
                notify_scheduler(
                    ctx,
                    &job,
                    &Settlement::Failed {
                        error: reason.clone(),
                    },
                )
                .await;
                ctx.results
                    .mark_failed(job.job_id, job.entity(), job.attempt, reason)
                    .await;
            }
        },
    }

    ack(delivery).await;
}

async fn notify_scheduler(ctx: &WorkerContext, job: &RecalculationJob, settlement: &Settlement) {
    if let Err(e) = ctx.scheduler.on_settled(job, settlement).await {
        error!(job_id = %job.job_id, error = %e, "could not release downstream jobs");
    }
}

async fn publish_retry(
    ctx: &WorkerContext,
    next: &RecalculationJob,
    delay: Duration,
) -> Result<(), crate::domain::EngineError> {
    let payload = wire::encode(next)?;
    ctx.broker
        .publish_delayed(route(next.entity_kind, next.reason), payload, delay)
        .await?;
    Ok(())
}

async fn ack(delivery: Box<dyn Delivery>) {
    let queue = delivery.queue();
    if let Err(e) = delivery.ack().await {
        warn!(%queue, error = %e, "ack failed");
    }
}

/// Run the executor in its own task under the soft and hard limits.
///
/// - soft limit: cancel the token, keep waiting
/// - hard limit: abort the task, report a transient error. A formula already
///   running on the blocking pool finishes on its own and is discarded.
/// - panic: transient error
async fn run_with_limits(
    ctx: &WorkerContext,
    job: &RecalculationJob,
) -> Result<Settlement, ExecutionError> {
    let cancel = CancellationToken::new();
    let mut handle = {
        let executor = Arc::clone(&ctx.executor);
        let job = job.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { executor.execute(&job, &cancel).await })
    };

    let soft = tokio::time::sleep(ctx.limits.soft);
    let hard = tokio::time::sleep(ctx.limits.hard);
    tokio::pin!(soft, hard);

    loop {
        tokio::select! {
            joined = &mut handle => {
                return match joined {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => Err(ExecutionError::transient("job panicked")),
                    Err(_) => Err(ExecutionError::transient("job cancelled")),
                };
            }
            _ = &mut soft, if !cancel.is_cancelled() => {
                warn!(job_id = %job.job_id, "soft time limit reached, cancelling");
                cancel.cancel();
            }
            _ = &mut hard => {
                handle.abort();
                warn!(job_id = %job.job_id, "hard time limit reached, job aborted");
                return Err(ExecutionError::transient("hard time limit exceeded"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::app::retry::{DefaultDecider, RetryPolicy};
    use crate::domain::{EntityId, EntityRef, JobId, JobState, Reason};
    use crate::graph::{HierarchyIndex, SharedIndex};
    use crate::impls::{InMemoryResultStore, InMemoryScoreStore, WeightedSumFormula};
    use crate::ports::{Facts, InputSource, ScoreStore, SystemClock, UlidGenerator};
    use crate::queue::InMemoryBroker;

    /// Fails transiently `failures` times, then returns fixed facts.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl InputSource for Flaky {
        async fn facts(&self, _: EntityRef) -> Result<Facts, ExecutionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(ExecutionError::transient("input unavailable"))
            } else {
                Ok(Facts::new().with("priority", 7.0))
            }
        }
    }

    /// Never answers.
    struct Stuck;

    #[async_trait]
    impl InputSource for Stuck {
        async fn facts(&self, _: EntityRef) -> Result<Facts, ExecutionError> {
            std::future::pending().await
        }
    }

    struct Fixture {
        index: SharedIndex,
        broker: Arc<InMemoryBroker>,
        results: Arc<InMemoryResultStore>,
        store: Arc<InMemoryScoreStore>,
        scheduler: Arc<Scheduler>,
        ctx: Arc<WorkerContext>,
    }

    fn task() -> EntityRef {
        EntityRef::task(EntityId::from_u128(10))
    }

    fn limits(soft: u64, hard: u64) -> TimeLimits {
        TimeLimits {
            soft: Duration::from_secs(soft),
            hard: Duration::from_secs(hard),
        }
    }

    async fn fixture(inputs: Arc<dyn InputSource>) -> Fixture {
        fixture_with(inputs, limits(300, 600)).await
    }

    async fn fixture_with(inputs: Arc<dyn InputSource>, limits: TimeLimits) -> Fixture {
        let mut index = HierarchyIndex::new();
        let pillar = EntityRef::pillar(EntityId::from_u128(1));
        let area = EntityRef::area(EntityId::from_u128(2));
        index.insert(pillar, None).unwrap();
        index.insert(area, Some(pillar)).unwrap();
        index.insert(task(), Some(area)).unwrap();
        let index = SharedIndex::new(index);

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(InMemoryScoreStore::new(clock.clone()));
        for e in [pillar, area, task()] {
            store.seed(e).await.unwrap();
        }
        let broker = Arc::new(InMemoryBroker::new(1));
        let results = Arc::new(InMemoryResultStore::new(
            clock.clone(),
            Duration::from_secs(3600),
        ));
        let scheduler = Arc::new(Scheduler::new(
            index.clone(),
            broker.clone(),
            results.clone(),
            Arc::new(UlidGenerator::new(SystemClock)),
            clock.clone(),
        ));
        let executor = Arc::new(Executor::new(
            index.clone(),
            store.clone(),
            inputs,
            Arc::new(WeightedSumFormula::default()),
        ));
        let ctx = Arc::new(WorkerContext {
            broker: broker.clone(),
            executor,
            scheduler: scheduler.clone(),
            results: results.clone(),
            decider: Arc::new(DefaultDecider::new(RetryPolicy::default())),
            clock,
            limits,
        });
        Fixture {
            index,
            broker,
            results,
            store,
            scheduler,
            ctx,
        }
    }

    async fn process_next(f: &Fixture, queue: QueueName) {
        let delivery = f.broker.lease(queue).await.unwrap();
        process(&f.ctx, delivery).await;
    }

    #[tokio::test(start_paused = true)]
    async fn success_is_recorded_then_acked_and_propagated() {
        let f = fixture(Arc::new(Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
        }))
        .await;
        let receipt = f.scheduler.on_event(task(), Reason::TaskCompleted).await.unwrap();

        process_next(&f, QueueName::TaskLeaf).await;

        let status = f.results.get(receipt.jobs[0].job_id).await.unwrap();
        assert_eq!(status.state, JobState::Succeeded);
        assert_eq!(f.store.read(task()).await.unwrap().value, 7.0);
        assert_eq!(f.broker.counts(QueueName::TaskLeaf).await.in_flight, 0);
        // parent area released
        assert_eq!(f.broker.counts(QueueName::Area).await.ready, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried_after_fixed_delay() {
        let f = fixture(Arc::new(Flaky {
            failures: 1,
            calls: AtomicU32::new(0),
        }))
        .await;
        let receipt = f.scheduler.on_event(task(), Reason::TaskCompleted).await.unwrap();
        let job_id = receipt.jobs[0].job_id;

        process_next(&f, QueueName::TaskLeaf).await;
        let status = f.results.get(job_id).await.unwrap();
        assert_eq!(status.state, JobState::Pending);
        assert_eq!(status.last_error.as_deref(), Some("transient: input unavailable"));
        assert_eq!(f.broker.counts(QueueName::TaskLeaf).await.scheduled, 1);

        let start = tokio::time::Instant::now();
        process_next(&f, QueueName::TaskLeaf).await;
        assert!(start.elapsed() >= Duration::from_secs(60));
        let status = f.results.get(job_id).await.unwrap();
        assert_eq!(status.state, JobState::Succeeded);
        assert_eq!(status.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_and_halt_propagation() {
        let f = fixture(Arc::new(Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        }))
        .await;
        let receipt = f.scheduler.on_event(task(), Reason::TaskCompleted).await.unwrap();
        let job_id = receipt.jobs[0].job_id;

        for _ in 0..3 {
            process_next(&f, QueueName::TaskLeaf).await;
        }

        let status = f.results.get(job_id).await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.attempts, 3);
        assert!(f.ctx.results.entity_failure(task()).await.is_some());
        assert_eq!(f.broker.outstanding(), 0);
        assert_eq!(f.scheduler.active_cascades().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn soft_limit_cancels_a_stuck_input() {
        let f = fixture(Arc::new(Stuck)).await;
        let receipt = f.scheduler.on_event(task(), Reason::TaskCompleted).await.unwrap();

        let start = tokio::time::Instant::now();
        process_next(&f, QueueName::TaskLeaf).await;

        assert!(start.elapsed() >= Duration::from_secs(300));
        assert!(start.elapsed() < Duration::from_secs(600));
        let status = f.results.get(receipt.jobs[0].job_id).await.unwrap();
        assert_eq!(status.state, JobState::Pending);
        assert!(status.last_error.unwrap().contains("soft time limit"));
    }

    #[tokio::test(start_paused = true)]
    async fn hard_limit_aborts_and_counts_as_transient() {
        // soft never fires first here
        let f = fixture_with(Arc::new(Stuck), limits(900, 30)).await;
        let receipt = f.scheduler.on_event(task(), Reason::TaskCompleted).await.unwrap();

        process_next(&f, QueueName::TaskLeaf).await;

        let status = f.results.get(receipt.jobs[0].job_id).await.unwrap();
        assert_eq!(status.state, JobState::Pending);
        assert_eq!(
            status.last_error.as_deref(),
            Some("transient: hard time limit exceeded")
        );
        assert_eq!(f.broker.counts(QueueName::TaskLeaf).await.scheduled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn redelivered_finished_job_is_not_executed_again() {
        let inputs = Arc::new(Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let f = fixture(inputs.clone()).await;
        let receipt = f.scheduler.on_event(task(), Reason::TaskCompleted).await.unwrap();
        process_next(&f, QueueName::TaskLeaf).await;

        // same message again, as after a lost ack
        let payload = wire::encode(&receipt.jobs[0]).unwrap();
        f.broker.publish(QueueName::TaskLeaf, payload).await.unwrap();
        process_next(&f, QueueName::TaskLeaf).await;

        assert_eq!(inputs.calls.load(Ordering::SeqCst), 1);
        let status = f.results.get(receipt.jobs[0].job_id).await.unwrap();
        assert_eq!(status.state, JobState::Succeeded);
        assert_eq!(f.broker.counts(QueueName::TaskLeaf).await.ready, 0);
        assert_eq!(f.broker.counts(QueueName::Area).await.ready, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn skipped_job_keeps_the_entity_failure() {
        let f = fixture(Arc::new(Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
        }))
        .await;
        let receipt = f.scheduler.on_event(task(), Reason::TaskCompleted).await.unwrap();
        let failure = EntityFailure {
            job_id: JobId::from_u128(1),
            error: "retries exhausted".into(),
            attempts: 3,
            failed_at: chrono::Utc::now(),
        };
        f.results.record_entity_failure(task(), failure.clone()).await;
        f.index.write().remove(task()).unwrap();

        process_next(&f, QueueName::TaskLeaf).await;

        let status = f.results.get(receipt.jobs[0].job_id).await.unwrap();
        assert_eq!(status.state, JobState::Succeeded);
        assert_eq!(f.results.entity_failure(task()).await, Some(failure));
    }

    #[tokio::test(start_paused = true)]
    async fn computed_job_clears_the_entity_failure() {
        let f = fixture(Arc::new(Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
        }))
        .await;
        f.scheduler.on_event(task(), Reason::TaskCompleted).await.unwrap();
        f.results
            .record_entity_failure(
                task(),
                EntityFailure {
                    job_id: JobId::from_u128(1),
                    error: "retries exhausted".into(),
                    attempts: 3,
                    failed_at: chrono::Utc::now(),
                },
            )
            .await;

        process_next(&f, QueueName::TaskLeaf).await;

        assert!(f.results.entity_failure(task()).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn garbage_is_dropped() {
        let f = fixture(Arc::new(Stuck)).await;
        f.broker
            .publish(QueueName::TaskLeaf, "{not json".into())
            .await
            .unwrap();

        process_next(&f, QueueName::TaskLeaf).await;

        assert_eq!(f.broker.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn group_stops_on_shutdown() {
        let f = fixture(Arc::new(Stuck)).await;
        let group = WorkerGroup::spawn(f.ctx.clone(), &QueueName::ALL);
        assert_eq!(group.len(), 4);
        tokio::task::yield_now().await;
        group.shutdown_and_join().await;
    }
}
