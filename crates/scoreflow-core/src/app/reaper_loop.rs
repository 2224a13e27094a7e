//! ReaperLoop - lease 期限切れの回収
//!
//! # フロー
//! 1. 定期的に Broker::reap_expired(lease_timeout) を呼ぶ
//! 2. hard time limit + grace を過ぎても ack されていない message は ready の先頭へ戻る
//!
//! A late ack from the original worker is then a no-op.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::ports::Broker;

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub interval: Duration,
    pub lease_timeout: Duration,
}

impl ReaperConfig {
    /// Checks twice per lease timeout, at least once a second.
    pub fn from_config(config: &EngineConfig) -> Self {
        let lease_timeout = config.lease_timeout();
        Self {
            interval: (lease_timeout / 2).max(Duration::from_secs(1)),
            lease_timeout,
        }
    }
}

pub fn spawn_reaper_task(
    broker: Arc<dyn Broker>,
    config: ReaperConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            interval_secs = config.interval.as_secs(),
            lease_timeout_secs = config.lease_timeout.as_secs(),
            "reaper task started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("reaper task shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let reaped = broker.reap_expired(config.lease_timeout).await;
                    if reaped > 0 {
                        warn!(reaped, "expired leases returned to their queues");
                    }
                }
            }
        }
    })
}
