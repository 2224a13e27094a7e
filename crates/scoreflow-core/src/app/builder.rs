//! EngineBuilder - エンジンの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - build() 時に EngineConfig::validate() を通す
//! - 未対応の backend URL は BuildError で拒否（起動後に気づくより早く）
//! - 差し替えなかった port は in-memory 実装で埋める

use std::sync::Arc;

use super::engine::Engine;
use super::executor::Executor;
use super::retry::{DefaultDecider, RetryPolicy};
use super::scheduler::Scheduler;
use super::sweep_loop::Sweeper;
use crate::config::{ConfigError, EngineConfig};
use crate::graph::SharedIndex;
use crate::impls::{InMemoryFacts, InMemoryResultStore, InMemoryScoreStore, WeightedSumFormula};
use crate::ports::{
    Broker, Clock, Decider, IdGenerator, InputSource, ResultStore, ScoreFormula, ScoreStore,
    SystemClock, UlidGenerator,
};
use crate::queue::InMemoryBroker;

const MEMORY_URL: &str = "memory://";

/// EngineBuilder はエンジンを構築
///
/// # 使用例
/// ```ignore
/// let facts = Arc::new(InMemoryFacts::new());
/// let engine = EngineBuilder::new()
///     .config(EngineConfig::from_env()?)
///     .inputs(facts.clone())
///     .build()?;
/// let handle = engine.start();
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    inputs: Option<Arc<dyn InputSource>>,
    formula: Option<Arc<dyn ScoreFormula>>,
    store: Option<Arc<dyn ScoreStore>>,
    ids: Option<Arc<dyn IdGenerator>>,
    decider: Option<Arc<dyn Decider>>,
}

/// BuildError はエンジン構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("unsupported {key} '{url}': only {MEMORY_URL} is built in")]
    UnsupportedBackend { key: &'static str, url: String },
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            clock: None,
            inputs: None,
            formula: None,
            store: None,
            ids: None,
            decider: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Where facts come from. Defaults to an empty `InMemoryFacts`.
    pub fn inputs(mut self, inputs: Arc<dyn InputSource>) -> Self {
        self.inputs = Some(inputs);
        self
    }

    pub fn formula(mut self, formula: Arc<dyn ScoreFormula>) -> Self {
        self.formula = Some(formula);
        self
    }

    pub fn score_store(mut self, store: Arc<dyn ScoreStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Replaces the retry policy built from the config.
    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    /// # 検証
    /// - config の値域チェック
    /// - broker_url / result_backend_url が memory:// であること
    pub fn build(self) -> Result<Engine, BuildError> {
        self.config.validate()?;
        for (key, url) in [
            ("broker_url", &self.config.broker_url),
            ("result_backend_url", &self.config.result_backend_url),
        ] {
            if url != MEMORY_URL {
                return Err(BuildError::UnsupportedBackend {
                    key,
                    url: url.clone(),
                });
            }
        }

        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryScoreStore::new(clock.clone())));
        let inputs = self
            .inputs
            .unwrap_or_else(|| Arc::new(InMemoryFacts::new()));
        let formula = self
            .formula
            .unwrap_or_else(|| Arc::new(WeightedSumFormula::default()));
        let decider = self.decider.unwrap_or_else(|| {
            Arc::new(DefaultDecider::new(RetryPolicy::from_config(&config)))
        });

        let index = SharedIndex::default();
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new(config.prefetch));
        let results: Arc<dyn ResultStore> = Arc::new(InMemoryResultStore::new(
            clock.clone(),
            config.result_expiry(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            index.clone(),
            broker.clone(),
            results.clone(),
            ids.clone(),
            clock.clone(),
        ));
        let executor = Arc::new(Executor::new(index.clone(), store.clone(), inputs, formula));
        let sweeper = Arc::new(Sweeper::new(
            index.clone(),
            scheduler.clone(),
            config.sweep_batch_size,
        ));

        Ok(Engine {
            config,
            index,
            store,
            broker,
            results,
            scheduler,
            executor,
            decider,
            sweeper,
            ids,
            clock,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
