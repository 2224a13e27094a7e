//! Impls - 実装（開発用・テスト用）
//!
//! ports の in-memory 実装。`memory://` backend として EngineBuilder が
//! 組み立てます。Broker の実装は `queue` モジュールにあります。

pub mod inmem_inputs;
pub mod inmem_results;
pub mod inmem_store;
pub mod weighted_formula;

// 主要な型を再エクスポート
pub use self::inmem_inputs::InMemoryFacts;
pub use self::inmem_results::InMemoryResultStore;
pub use self::inmem_store::InMemoryScoreStore;
pub use self::weighted_formula::WeightedSumFormula;
