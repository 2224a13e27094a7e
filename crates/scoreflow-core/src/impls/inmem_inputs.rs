//! InMemoryFacts - facts kept in a map, for the CLI demo and tests.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::domain::{EntityRef, ExecutionError};
use crate::ports::{Facts, InputSource};

/// Entities without facts read as empty facts.
#[derive(Debug, Default)]
pub struct InMemoryFacts {
    facts: RwLock<HashMap<EntityRef, Facts>>,
}

impl InMemoryFacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, entity: EntityRef, facts: Facts) {
        self.facts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity, facts);
    }

    /// Update one fact, keeping the others.
    pub fn set_fact(&self, entity: EntityRef, name: &str, value: f64) {
        self.facts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(entity)
            .or_default()
            .set(name, value);
    }

    /// Current facts of `entity`, empty if none were set.
    pub fn get(&self, entity: EntityRef) -> Facts {
        self.facts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&entity)
            .cloned()
            .unwrap_or_default()
    }

    pub fn remove(&self, entity: EntityRef) {
        self.facts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&entity);
    }
}

#[async_trait]
impl InputSource for InMemoryFacts {
    async fn facts(&self, entity: EntityRef) -> Result<Facts, ExecutionError> {
        Ok(self.get(entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntityId;

    #[tokio::test]
    async fn set_fact_merges_into_existing_facts() {
        let source = InMemoryFacts::new();
        let task = EntityRef::task(EntityId::from_u128(1));

        source.set(task, Facts::new().with("priority", 3.0));
        source.set_fact(task, "progress", 0.5);

        let facts = source.facts(task).await.unwrap();
        assert_eq!(facts.get("priority"), Some(3.0));
        assert_eq!(facts.get("progress"), Some(0.5));
    }

    #[tokio::test]
    async fn unknown_entity_has_empty_facts() {
        let source = InMemoryFacts::new();
        let facts = source
            .facts(EntityRef::area(EntityId::from_u128(2)))
            .await
            .unwrap();
        assert_eq!(facts, Facts::new());
    }
}
