//! Status - エンジン全体の状態
//!
//! Queue depths and cascade counts, for operators and for tests waiting on
//! quiescence.

use serde::Serialize;

use crate::ports::QueueCounts;
use crate::routing::QueueName;

/// Snapshot of the engine at one instant.
///
/// # 使用例
/// ```ignore
/// let status = engine.status().await;
/// println!("{}", serde_json::to_string_pretty(&status)?);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub queues: Vec<QueueStatus>,
    pub active_cascades: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub queue: QueueName,
    pub ready: usize,
    pub in_flight: usize,
    pub scheduled: usize,
}

impl QueueStatus {
    pub fn new(queue: QueueName, counts: QueueCounts) -> Self {
        Self {
            queue,
            ready: counts.ready,
            in_flight: counts.in_flight,
            scheduled: counts.scheduled,
        }
    }
}

impl EngineStatus {
    /// Messages not yet acknowledged, in any state.
    pub fn outstanding(&self) -> usize {
        self.queues
            .iter()
            .map(|q| q.ready + q.in_flight + q.scheduled)
            .sum()
    }

    /// Nothing queued, nothing running, no plan waiting.
    pub fn is_idle(&self) -> bool {
        self.outstanding() == 0 && self.active_cascades == 0
    }

    pub fn queue(&self, queue: QueueName) -> Option<&QueueStatus> {
        self.queues.iter().find(|q| q.queue == queue)
    }
}
