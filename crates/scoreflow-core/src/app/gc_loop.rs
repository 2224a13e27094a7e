//! GcLoop - 期限切れの job 結果と古い cascade plan の掃除
//!
//! Results also expire lazily (an expired record reads as unknown); this
//! loop frees the memory.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::scheduler::Scheduler;
use crate::config::EngineConfig;
use crate::ports::ResultStore;

#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Interval between runs (default: 60 seconds).
    pub interval: Duration,
    /// Plans older than this are dropped (default: the result expiry).
    pub cascade_max_age: Duration,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            cascade_max_age: Duration::from_secs(3600),
        }
    }
}

impl GcConfig {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            interval: config.gc_interval(),
            cascade_max_age: config.result_expiry(),
        }
    }
}

pub fn spawn_gc_task(
    results: Arc<dyn ResultStore>,
    scheduler: Arc<Scheduler>,
    config: GcConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(interval_secs = config.interval.as_secs(), "gc task started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("gc task shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    run_gc_iteration(results.as_ref(), &scheduler, &config).await;
                }
            }
        }
    })
}

/// One pass. Returns (purged results, dropped plans).
pub async fn run_gc_iteration(
    results: &dyn ResultStore,
    scheduler: &Scheduler,
    config: &GcConfig,
) -> (usize, usize) {
    let purged = results.purge_expired().await;
    let pruned = match scheduler.prune_cascades(config.cascade_max_age).await {
        Ok(pruned) => pruned,
        Err(e) => {
            warn!(error = %e, "could not replan work owed by stale cascades");
            0
        }
    };
    if purged > 0 || pruned > 0 {
        debug!(purged, pruned, "gc pass");
    }
    (purged, pruned)
}
