#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scoreflow_core::domain::{EntityId, EntityRef, ExecutionError};
use scoreflow_core::impls::{InMemoryFacts, WeightedSumFormula};
use scoreflow_core::ports::{Facts, InputSource, ScoreFormula, ScoreInputs};
use scoreflow_core::{Engine, EngineBuilder, EngineConfig};

pub fn pillar(n: u128) -> EntityRef {
    EntityRef::pillar(EntityId::from_u128(n))
}

pub fn area(n: u128) -> EntityRef {
    EntityRef::area(EntityId::from_u128(n))
}

pub fn project(n: u128) -> EntityRef {
    EntityRef::project(EntityId::from_u128(n))
}

pub fn task(n: u128) -> EntityRef {
    EntityRef::task(EntityId::from_u128(n))
}

/// One formula evaluation as the formula saw it.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub entity: EntityRef,
    pub children: Vec<(EntityRef, f64)>,
    pub predecessors: Vec<(EntityRef, f64)>,
    pub value: f64,
}

/// Weighted sum that remembers every evaluation in order.
#[derive(Default)]
pub struct RecordingFormula {
    inner: WeightedSumFormula,
    log: Mutex<Vec<Evaluation>>,
}

impl RecordingFormula {
    pub fn take(&self) -> Vec<Evaluation> {
        std::mem::take(&mut *self.log.lock().unwrap())
    }

    pub fn evaluations_of(log: &[Evaluation], entity: EntityRef) -> Vec<Evaluation> {
        log.iter().filter(|e| e.entity == entity).cloned().collect()
    }

    pub fn position(log: &[Evaluation], entity: EntityRef) -> usize {
        log.iter()
            .position(|e| e.entity == entity)
            .unwrap_or_else(|| panic!("{entity} was never evaluated"))
    }
}

impl ScoreFormula for RecordingFormula {
    fn compute(&self, inputs: &ScoreInputs) -> Result<f64, ExecutionError> {
        let value = self.inner.compute(inputs)?;
        self.log.lock().unwrap().push(Evaluation {
            entity: inputs.entity,
            children: inputs.children.clone(),
            predecessors: inputs.predecessors.clone(),
            value,
        });
        Ok(value)
    }
}

/// Facts that fail transiently for entities marked broken.
#[derive(Default)]
pub struct BreakableFacts {
    pub facts: InMemoryFacts,
    broken: Mutex<HashSet<EntityRef>>,
}

impl BreakableFacts {
    pub fn set_broken(&self, entity: EntityRef, broken: bool) {
        let mut set = self.broken.lock().unwrap();
        if broken {
            set.insert(entity);
        } else {
            set.remove(&entity);
        }
    }
}

#[async_trait]
impl InputSource for BreakableFacts {
    async fn facts(&self, entity: EntityRef) -> Result<Facts, ExecutionError> {
        if self.broken.lock().unwrap().contains(&entity) {
            return Err(ExecutionError::transient(format!("{entity}: input service down")));
        }
        self.facts.facts(entity).await
    }
}

pub struct Harness {
    pub engine: Engine,
    pub inputs: Arc<BreakableFacts>,
    pub formula: Arc<RecordingFormula>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let inputs = Arc::new(BreakableFacts::default());
        let formula = Arc::new(RecordingFormula::default());
        let engine = EngineBuilder::new()
            .config(config)
            .inputs(inputs.clone())
            .formula(formula.clone())
            .build()
            .unwrap();
        Self {
            engine,
            inputs,
            formula,
        }
    }

    pub fn set_priority(&self, entity: EntityRef, priority: f64) {
        self.inputs.facts.set_fact(entity, "priority", priority);
    }

    pub async fn value(&self, entity: EntityRef) -> f64 {
        self.engine.score(entity).await.unwrap().value
    }

    pub async fn settle(&self) {
        self.engine.wait_idle(Duration::from_millis(10)).await;
    }

    /// pillar 1 > area 2 > project 3 > tasks
    pub async fn with_project(&self, tasks: &[u128]) {
        self.engine.register_entity(pillar(1), None).await.unwrap();
        self.engine
            .register_entity(area(2), Some(pillar(1)))
            .await
            .unwrap();
        self.engine
            .register_entity(project(3), Some(area(2)))
            .await
            .unwrap();
        for &t in tasks {
            self.engine
                .register_entity(task(t), Some(project(3)))
                .await
                .unwrap();
        }
    }
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}
