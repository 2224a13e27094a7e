//! Broker port - 配送キュー
//!
//! A broker carries encoded job text on named queues with late
//! acknowledgment:
//! - `lease()` hands out one delivery; the message stays owned by the broker
//! - `Delivery::ack()` removes it for good
//! - a delivery dropped without `ack()` goes back to the head of its queue
//!   and is marked as redelivered
//!
//! Per queue, at most `prefetch` deliveries are unacknowledged at once.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::routing::QueueName;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("broker closed")]
    Closed,

    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// Message counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Waiting to be leased.
    pub ready: usize,
    /// Leased and not yet acknowledged.
    pub in_flight: usize,
    /// Delayed (retry backoff).
    pub scheduled: usize,
}

impl QueueCounts {
    pub fn is_empty(&self) -> bool {
        self.ready == 0 && self.in_flight == 0 && self.scheduled == 0
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Append to the tail of `queue`.
    async fn publish(&self, queue: QueueName, payload: String) -> Result<(), BrokerError>;

    /// Append to the tail of `queue` once `delay` has passed.
    async fn publish_delayed(
        &self,
        queue: QueueName,
        payload: String,
        delay: Duration,
    ) -> Result<(), BrokerError>;

    /// Wait for the next message on `queue`. `Err(Closed)` once the broker
    /// is shut down.
    async fn lease(&self, queue: QueueName) -> Result<Box<dyn Delivery>, BrokerError>;

    /// Requeue leases held longer than `max_age`. Returns how many.
    async fn reap_expired(&self, max_age: Duration) -> usize;

    async fn counts(&self, queue: QueueName) -> QueueCounts;

    /// Wake every waiting `lease()` with `Err(Closed)`.
    fn close(&self);
}

/// One leased message.
#[async_trait]
pub trait Delivery: Send {
    fn queue(&self) -> QueueName;

    fn payload(&self) -> &str;

    /// Whether this message was leased before and never acknowledged.
    fn redelivered(&self) -> bool;

    /// Settle the message. Acknowledging a lease the reaper already took back
    /// is a no-op.
    async fn ack(self: Box<Self>) -> Result<(), BrokerError>;
}
