//! Ports - 抽象化レイヤー
//!
//! 外部システム（score DB, broker, result backend, 入力データ）への
//! インターフェースを trait として定義します。In-memory 実装は `impls`
//! と `queue` にあります。

pub mod broker;
pub mod clock;
pub mod decider;
pub mod formula;
pub mod id_generator;
pub mod inputs;
pub mod result_store;
pub mod score_store;

// 主要な trait を再エクスポート
pub use self::broker::{Broker, BrokerError, Delivery, QueueCounts};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::decider::{Decider, Decision};
pub use self::formula::{ScoreFormula, ScoreInputs};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::inputs::{Facts, InputSource};
pub use self::result_store::ResultStore;
pub use self::score_store::ScoreStore;
