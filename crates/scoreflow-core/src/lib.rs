//! scoreflow-core
//!
//! Score propagation engine: when an entity of the
//! Pillar > Area > Project > Task hierarchy changes, every score that
//! depends on it is recomputed through per-kind queues, children and
//! predecessors before the entities that read them.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, entity, score, job, outcome, errors）
//! - **graph**: 階層と task 依存の index
//! - **routing**: (kind, reason) → queue、wire format
//! - **ports**: 抽象化レイヤー（ScoreStore, Broker, ResultStore, InputSource, ScoreFormula, Decider, ...）
//! - **impls / queue**: in-memory 実装（`memory://` backend）
//! - **app**: scheduler, executor, worker loop, background loops, engine façade
//! - **config**: EngineConfig（env / .env から読み込み）

pub mod app;
pub mod config;
pub mod domain;
pub mod graph;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod routing;

pub use app::{CascadeReceipt, Engine, EngineBuilder, EngineHandle, EngineStatus};
pub use config::EngineConfig;
pub use domain::{EngineError, EntityId, EntityKind, EntityRef, JobId, JobState, Reason};
