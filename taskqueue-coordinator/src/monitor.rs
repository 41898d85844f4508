//! The monitor loop (§4.6): a dead-worker sweep followed by lease reclaim,
//! on a fixed tick. Runs as its own tokio task so it never shares a stack
//! frame with request handlers — borrowed from the teacher lineage's
//! `Actor::serve_in_background` shape (a background loop owning a handle
//! into the shared state, logging and moving on rather than panicking the
//! process on a single failed tick).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use taskqueue_store::Store;
use tracing::{error, info};

pub struct MonitorConfig {
    pub tick: Duration,
    pub worker_dead_after: Duration,
}

/// Runs the monitor loop until the process exits. Intended to be spawned
/// with `tokio::spawn` and never awaited to completion.
pub async fn run(store: Arc<dyn Store>, config: MonitorConfig) {
    let mut interval = tokio::time::interval(config.tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        match store.run_monitor_tick(config.worker_dead_after, Utc::now()).await {
            Ok(report) => {
                for worker_id in &report.newly_dead_workers {
                    info!(worker_id, "worker declared dead");
                }
                for task_id in &report.reclaimed_tasks {
                    info!(task_id, "task reclaimed to pending");
                }
            }
            Err(e) => {
                error!(error = %e, "monitor tick failed, retrying next tick");
            }
        }
    }
}
