//! InMemoryScoreStore - 開発用・テスト用の score store
//!
//! # 実装詳細
//! - HashMap<EntityRef, Score> を tokio RwLock で保護
//! - compare_and_write は write lock 内で version 比較と書き込みを行う
//!   （比較と書き込みの間に他の writer は入れない）

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{EntityRef, JobId, Score, StoreError, WriteOutcome};
use crate::ports::{Clock, ScoreStore};

pub struct InMemoryScoreStore {
    scores: RwLock<HashMap<EntityRef, Score>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryScoreStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            scores: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Copy of every stored score.
    pub async fn snapshot(&self) -> HashMap<EntityRef, Score> {
        self.scores.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.scores.read().await.len()
    }
}

#[async_trait]
impl ScoreStore for InMemoryScoreStore {
    async fn read(&self, entity: EntityRef) -> Result<Score, StoreError> {
        self.scores
            .read()
            .await
            .get(&entity)
            .cloned()
            .ok_or(StoreError::NotFound(entity))
    }

    async fn compare_and_write(
        &self,
        entity: EntityRef,
        value: f64,
        expected_version: u64,
        writer: JobId,
    ) -> Result<WriteOutcome, StoreError> {
        let mut scores = self.scores.write().await;
        let score = scores.get_mut(&entity).ok_or(StoreError::NotFound(entity))?;

        if score.version != expected_version {
            return Ok(WriteOutcome::Conflict {
                current: score.version,
            });
        }
        score.value = value;
        score.version += 1;
        score.updated_at = self.clock.now();
        score.written_by = Some(writer);
        Ok(WriteOutcome::Written {
            version: score.version,
        })
    }

    async fn seed(&self, entity: EntityRef) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.scores
            .write()
            .await
            .entry(entity)
            .or_insert_with(|| Score::seed(now));
        Ok(())
    }

    async fn remove(&self, entity: EntityRef) -> Result<(), StoreError> {
        self.scores.write().await.remove(&entity);
        Ok(())
    }
}
