//! App - アプリケーション層
//!
//! ports を組み合わせてエンジンを組み立てます。
//!
//! # 主要コンポーネント
//! - **EngineBuilder / Engine**: 構築と外部 API
//! - **Scheduler / CascadePlan**: event → cascade plan → 段階的な job 投入
//! - **Executor**: 1 job の再計算（read → inputs → formula → conditional write）
//! - **WorkerGroup**: queue ごとのワーカー（lease → execute → decide → ack）
//! - **ReaperLoop / GcLoop / SweepLoop**: バックグラウンド処理

pub mod builder;
pub mod cascade;
pub mod engine;
pub mod executor;
pub mod gc_loop;
pub mod reaper_loop;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod sweep_loop;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, EngineBuilder};
pub use self::cascade::{CascadePlan, NodeOutcome};
pub use self::engine::{Engine, EngineHandle};
pub use self::executor::Executor;
pub use self::retry::{DefaultDecider, RetryPolicy};
pub use self::scheduler::{CascadeReceipt, Scheduler};
pub use self::status::{EngineStatus, QueueStatus};
pub use self::worker_loop::{TimeLimits, WorkerContext, WorkerGroup};
