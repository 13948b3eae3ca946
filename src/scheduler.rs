use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::engine::{Engine, SweepReport};
use crate::model::Ms;

/// Periodic driver of the completion sweep.
pub struct LifecycleScheduler {
    engine: Arc<Engine>,
}

impl LifecycleScheduler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// One sweep at `now`. Failures are in the report, never raised.
    pub async fn tick(&self, now: Ms) -> SweepReport {
        let report = self.engine.sweep_completed(now).await;
        if !report.completed.is_empty() || !report.is_clean() {
            info!(
                "lifecycle sweep: {} completed, {} failed",
                report.completed.len(),
                report.failed.len()
            );
        }
        report
    }

    /// Tick every `period` until the task is aborted. A tick that overruns
    /// the period makes the next one skip rather than burst.
    pub async fn run(self, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.tick(self.engine.now()).await;
        }
    }
}

/// Compact the WAL whenever `threshold` appends have piled up since the
/// last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(written) => info!("compacted WAL: {appends} appends folded into {written} records"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}
