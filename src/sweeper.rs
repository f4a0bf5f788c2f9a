use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::{Engine, now_ms};

/// Background task that keeps each room's cached `active` flag in step with
/// the clock as bookings slide into the past.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let active = engine.refresh_active(now_ms()).await;
        debug!("activity sweep: {active} active rooms");
    }
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}

/// Spawn the sweeper and compactor for `engine`.
pub fn spawn(engine: &Arc<Engine>, config: &Config) -> (JoinHandle<()>, JoinHandle<()>) {
    let sweeper = tokio::spawn(run_sweeper(engine.clone(), config.sweep_interval));
    let compactor = tokio::spawn(run_compactor(
        engine.clone(),
        config.compact_threshold,
        config.sweep_interval,
    ));
    (sweeper, compactor)
}
