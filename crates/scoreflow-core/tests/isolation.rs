//! Queues do not wait on each other.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{area, assert_close, pillar, project, task};
use scoreflow_core::domain::{EntityRef, ExecutionError};
use scoreflow_core::impls::InMemoryFacts;
use scoreflow_core::ports::{Facts, InputSource};
use scoreflow_core::routing::QueueName;
use scoreflow_core::{EngineBuilder, EntityKind, JobState, Reason};

const TASK_INPUT_DELAY: Duration = Duration::from_secs(30);

/// Task inputs take a while; aggregate inputs answer at once.
#[derive(Default)]
struct SlowTasks {
    facts: InMemoryFacts,
}

#[async_trait]
impl InputSource for SlowTasks {
    async fn facts(&self, entity: EntityRef) -> Result<Facts, ExecutionError> {
        if entity.is_task() {
            tokio::time::sleep(TASK_INPUT_DELAY).await;
        }
        self.facts.facts(entity).await
    }
}

#[tokio::test(start_paused = true)]
async fn task_burst_does_not_delay_an_area_job() {
    let inputs = Arc::new(SlowTasks::default());
    let engine = EngineBuilder::new().inputs(inputs.clone()).build().unwrap();
    engine.register_entity(pillar(1), None).await.unwrap();
    engine.register_entity(area(2), Some(pillar(1))).await.unwrap();
    engine
        .register_entity(project(3), Some(area(2)))
        .await
        .unwrap();
    let tasks: Vec<u128> = (100..120).collect();
    for &n in &tasks {
        engine
            .register_entity(task(n), Some(project(3)))
            .await
            .unwrap();
        inputs.facts.set_fact(task(n), "priority", n as f64);
    }
    inputs.facts.set_fact(area(2), "priority", 4.0);
    let handle = engine.start();

    for &n in &tasks {
        engine
            .notify_changed(EntityKind::Task, task(n).id, Reason::TaskCompleted)
            .await
            .unwrap();
    }
    let started = tokio::time::Instant::now();
    let receipt = engine
        .notify_changed(EntityKind::Area, area(2).id, Reason::Reprioritized)
        .await
        .unwrap();
    assert_eq!(receipt.jobs.len(), 1);
    let area_job = receipt.jobs[0].job_id;

    loop {
        let state = engine.get_job_outcome(area_job).await.map(|s| s.state);
        if state == Some(JobState::Succeeded) {
            break;
        }
        assert!(
            started.elapsed() < TASK_INPUT_DELAY,
            "area job waited behind the task queue"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let status = engine.status().await;
    let leaf = status.queue(QueueName::TaskLeaf).unwrap();
    assert!(
        leaf.ready + leaf.in_flight >= tasks.len() - 1,
        "task burst should still be queued, got {leaf:?}"
    );
    assert_close(engine.score(area(2)).await.unwrap().value, 4.0);

    handle.shutdown().await;
}
