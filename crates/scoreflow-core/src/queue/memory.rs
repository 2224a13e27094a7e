//! In-memory broker implementation.
//!
//! - four fixed queues, each with a ready deque, an in-flight table and a
//!   scheduled heap for delayed (retry) messages
//! - leases are late-acknowledged: the message stays in `in_flight` until
//!   `ack()`. Dropping an unsettled `Delivery` puts the message back at the
//!   head of its queue, flagged as redelivered
//! - state lives behind a std `Mutex` that is never held across `.await`
//! - time is `tokio::time::Instant`, so paused-clock tests control retries

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::ports::{Broker, BrokerError, Delivery, QueueCounts};
use crate::routing::QueueName;

fn slot(queue: QueueName) -> usize {
    match queue {
        QueueName::TaskLeaf => 0,
        QueueName::TaskDependency => 1,
        QueueName::Area => 2,
        QueueName::Project => 3,
    }
}

#[derive(Debug, Clone)]
struct Message {
    tag: u64,
    payload: String,
    redelivered: bool,
}

impl Message {
    /// Back to the queue under a fresh tag, so an ack for the old lease
    /// cannot settle the new one.
    fn requeued(self, next_tag: &mut u64) -> Self {
        *next_tag += 1;
        Self {
            tag: *next_tag,
            redelivered: true,
            ..self
        }
    }
}

#[derive(Debug)]
struct InFlight {
    message: Message,
    leased_at: Instant,
}

/// Scheduled message entry for priority queue.
///
/// We use Reverse ordering so BinaryHeap acts as a min-heap (earliest first,
/// then publish order).
#[derive(Debug, PartialEq, Eq)]
struct Scheduled {
    run_at: Instant,
    seq: u64,
    payload: String,
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering: earlier times have higher priority
        (other.run_at, other.seq).cmp(&(self.run_at, self.seq))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Message>,
    in_flight: HashMap<u64, InFlight>,
    scheduled: BinaryHeap<Scheduled>,
}

impl QueueState {
    /// Move delayed messages whose time has come to the tail of `ready`.
    fn promote_scheduled(&mut self, now: Instant, next_tag: &mut u64) {
        while let Some(entry) = self.scheduled.peek() {
            if entry.run_at > now {
                break; // Heap is sorted, so we can stop
            }
            if let Some(entry) = self.scheduled.pop() {
                *next_tag += 1;
                self.ready.push_back(Message {
                    tag: *next_tag,
                    payload: entry.payload,
                    redelivered: false,
                });
            }
        }
    }

    fn counts(&self) -> QueueCounts {
        QueueCounts {
            ready: self.ready.len(),
            in_flight: self.in_flight.len(),
            scheduled: self.scheduled.len(),
        }
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: [QueueState; 4],
    next_tag: u64,
    closed: bool,
}

struct Shared {
    state: Mutex<BrokerState>,
    notify: [Notify; 4],
    prefetch: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake(&self, queue: QueueName) {
        self.notify[slot(queue)].notify_one();
    }
}

/// Broker behind the `memory://` URL.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    /// `prefetch` bounds unacknowledged deliveries per queue (minimum 1).
    pub fn new(prefetch: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                notify: Default::default(),
                prefetch: prefetch.max(1),
            }),
        }
    }

    /// Total messages not yet acknowledged, across all queues.
    pub fn outstanding(&self) -> usize {
        let state = self.shared.lock();
        state
            .queues
            .iter()
            .map(|q| q.ready.len() + q.in_flight.len() + q.scheduled.len())
            .sum()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, queue: QueueName, payload: String) -> Result<(), BrokerError> {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(BrokerError::Closed);
            }
            state.next_tag += 1;
            let tag = state.next_tag;
            state.queues[slot(queue)].ready.push_back(Message {
                tag,
                payload,
                redelivered: false,
            });
        }
        self.shared.wake(queue);
        Ok(())
    }

    async fn publish_delayed(
        &self,
        queue: QueueName,
        payload: String,
        delay: Duration,
    ) -> Result<(), BrokerError> {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(BrokerError::Closed);
            }
            state.next_tag += 1;
            let seq = state.next_tag;
            state.queues[slot(queue)].scheduled.push(Scheduled {
                run_at: Instant::now() + delay,
                seq,
                payload,
            });
        }
        // 待機中の lease に次の起床時刻を再計算させる
        self.shared.wake(queue);
        Ok(())
    }

    async fn lease(&self, queue: QueueName) -> Result<Box<dyn Delivery>, BrokerError> {
        let notify = &self.shared.notify[slot(queue)];
        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_wake = {
                let mut guard = self.shared.lock();
                let state = &mut *guard;
                if state.closed {
                    return Err(BrokerError::Closed);
                }
                let now = Instant::now();
                let q = &mut state.queues[slot(queue)];
                q.promote_scheduled(now, &mut state.next_tag);

                if q.in_flight.len() < self.shared.prefetch
                    && let Some(message) = q.ready.pop_front()
                {
                    let delivery = InMemoryDelivery {
                        shared: Arc::clone(&self.shared),
                        queue,
                        tag: message.tag,
                        payload: message.payload.clone(),
                        redelivered: message.redelivered,
                        settled: false,
                    };
                    q.in_flight.insert(
                        message.tag,
                        InFlight {
                            message,
                            leased_at: now,
                        },
                    );
                    return Ok(Box::new(delivery));
                }

                q.scheduled.peek().map(|entry| entry.run_at)
            };

            // Wait for notification OR next scheduled message time
            match next_wake {
                Some(wake_at) => {
                    tokio::select! {
                        _ = &mut notified => {},
                        _ = tokio::time::sleep_until(wake_at) => {},
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn reap_expired(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut reaped_queues = Vec::new();
        let mut total = 0;
        {
            let mut guard = self.shared.lock();
            let state = &mut *guard;
            for queue in QueueName::ALL {
                let q = &mut state.queues[slot(queue)];
                let mut expired: Vec<u64> = q
                    .in_flight
                    .iter()
                    .filter(|(_, f)| now.saturating_duration_since(f.leased_at) >= max_age)
                    .map(|(tag, _)| *tag)
                    .collect();
                if expired.is_empty() {
                    continue;
                }
                // oldest first ends up at the head
                expired.sort_unstable_by(|a, b| b.cmp(a));
                for tag in expired {
                    if let Some(flight) = q.in_flight.remove(&tag) {
                        q.ready
                            .push_front(flight.message.requeued(&mut state.next_tag));
                        total += 1;
                    }
                }
                reaped_queues.push(queue);
            }
        }
        for queue in reaped_queues {
            self.shared.wake(queue);
        }
        total
    }

    async fn counts(&self, queue: QueueName) -> QueueCounts {
        self.shared.lock().queues[slot(queue)].counts()
    }

    fn close(&self) {
        self.shared.lock().closed = true;
        for notify in &self.shared.notify {
            notify.notify_waiters();
            notify.notify_one();
        }
    }
}

/// Lease handed out by `InMemoryBroker::lease`.
struct InMemoryDelivery {
    shared: Arc<Shared>,
    queue: QueueName,
    tag: u64,
    payload: String,
    redelivered: bool,
    settled: bool,
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn queue(&self) -> QueueName {
        self.queue
    }

    fn payload(&self) -> &str {
        &self.payload
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        let mut this = self;
        this.settled = true;
        this.shared.lock().queues[slot(this.queue)]
            .in_flight
            .remove(&this.tag);
        // prefetch 枠が空いたので待機中の lease を起こす
        this.shared.wake(this.queue);
        Ok(())
    }
}

impl Drop for InMemoryDelivery {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let requeued = {
            let mut guard = self.shared.lock();
            let state = &mut *guard;
            let q = &mut state.queues[slot(self.queue)];
            match q.in_flight.remove(&self.tag) {
                Some(flight) => {
                    q.ready
                        .push_front(flight.message.requeued(&mut state.next_tag));
                    true
                }
                // reaper already took it back
                None => false,
            }
        };
        if requeued {
            self.shared.wake(self.queue);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const Q: QueueName = QueueName::TaskLeaf;

    async fn lease_now(broker: &InMemoryBroker, queue: QueueName) -> Option<Box<dyn Delivery>> {
        tokio::time::timeout(Duration::from_millis(10), broker.lease(queue))
            .await
            .ok()
            .and_then(Result::ok)
    }

    #[tokio::test(start_paused = true)]
    async fn fifo_within_a_queue() {
        let broker = InMemoryBroker::new(1);
        broker.publish(Q, "a".into()).await.unwrap();
        broker.publish(Q, "b".into()).await.unwrap();

        let first = broker.lease(Q).await.unwrap();
        assert_eq!(first.payload(), "a");
        first.ack().await.unwrap();

        let second = broker.lease(Q).await.unwrap();
        assert_eq!(second.payload(), "b");
        assert!(!second.redelivered());
    }

    #[tokio::test(start_paused = true)]
    async fn prefetch_limits_unacknowledged_deliveries() {
        let broker = InMemoryBroker::new(1);
        broker.publish(Q, "a".into()).await.unwrap();
        broker.publish(Q, "b".into()).await.unwrap();

        let first = broker.lease(Q).await.unwrap();
        assert!(lease_now(&broker, Q).await.is_none());

        let counts = broker.counts(Q).await;
        assert_eq!(counts.ready, 1);
        assert_eq!(counts.in_flight, 1);

        first.ack().await.unwrap();
        assert_eq!(lease_now(&broker, Q).await.unwrap().payload(), "b");
    }

    #[tokio::test(start_paused = true)]
    async fn queues_are_independent() {
        let broker = InMemoryBroker::new(1);
        broker.publish(Q, "task".into()).await.unwrap();
        broker.publish(QueueName::Area, "area".into()).await.unwrap();

        let _held = broker.lease(Q).await.unwrap();
        let area = lease_now(&broker, QueueName::Area).await.unwrap();
        assert_eq!(area.payload(), "area");
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_delivery_is_redelivered_at_the_head() {
        let broker = InMemoryBroker::new(1);
        broker.publish(Q, "a".into()).await.unwrap();
        broker.publish(Q, "b".into()).await.unwrap();

        drop(broker.lease(Q).await.unwrap());

        let again = broker.lease(Q).await.unwrap();
        assert_eq!(again.payload(), "a");
        assert!(again.redelivered());
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_publish_waits_for_its_time() {
        let broker = InMemoryBroker::new(1);
        broker
            .publish_delayed(Q, "later".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(broker.counts(Q).await.scheduled, 1);

        let start = Instant::now();
        let delivery = broker.lease(Q).await.unwrap();
        assert_eq!(delivery.payload(), "later");
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_requeues_old_leases_and_late_ack_is_noop() {
        let broker = InMemoryBroker::new(1);
        broker.publish(Q, "slow".into()).await.unwrap();
        let stuck = broker.lease(Q).await.unwrap();

        assert_eq!(broker.reap_expired(Duration::from_secs(10)).await, 0);
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(broker.reap_expired(Duration::from_secs(10)).await, 1);

        let again = broker.lease(Q).await.unwrap();
        assert_eq!(again.payload(), "slow");
        assert!(again.redelivered());

        // the late ack must not settle the new lease
        stuck.ack().await.unwrap();
        assert_eq!(broker.counts(Q).await.in_flight, 1);
        again.ack().await.unwrap();
        assert_eq!(broker.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn close_wakes_waiting_lease() {
        let broker = InMemoryBroker::new(1);
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.lease(Q).await.map(|_| ()) })
        };
        tokio::task::yield_now().await;

        broker.close();
        assert_eq!(waiter.await.unwrap(), Err(BrokerError::Closed));
        assert_eq!(
            broker.publish(Q, "x".into()).await,
            Err(BrokerError::Closed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn outstanding_counts_every_unacked_message() {
        let broker = InMemoryBroker::new(1);
        broker.publish(Q, "a".into()).await.unwrap();
        broker
            .publish_delayed(QueueName::Project, "b".into(), Duration::from_secs(5))
            .await
            .unwrap();
        let d = broker.lease(Q).await.unwrap();
        assert_eq!(broker.outstanding(), 2);
        d.ack().await.unwrap();
        assert_eq!(broker.outstanding(), 1);
    }
}
