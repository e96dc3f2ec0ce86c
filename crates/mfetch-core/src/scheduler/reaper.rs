//! Periodic retention sweep: forgets old terminal jobs and removes orphaned
//! scratch directories, including namespaces of processes that have exited.

use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

use super::Shared;
use crate::artifact::{sweep_abandoned, StoreError};

/// What one reaper pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapStats {
    /// Terminal jobs past retention that were forgotten.
    pub forgotten: usize,
    /// Scratch directories with no live owner that were deleted.
    pub swept: usize,
}

pub(super) async fn reaper_loop(shared: Arc<Shared>) {
    let mut tick = tokio::time::interval(shared.config.reap_interval());
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tick.tick().await;
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = tick.tick() => {}
        }
        match reap_once(&shared).await {
            Ok(stats) if stats != ReapStats::default() => {
                info!(forgotten = stats.forgotten, swept = stats.swept, "reaper pass")
            }
            Ok(_) => {}
            Err(e) => warn!("reaper pass failed: {}", e),
        }
    }
    debug!("reaper stopped");
}

pub(super) async fn reap_once(shared: &Shared) -> Result<ReapStats, StoreError> {
    let retention = shared.config.retention();
    let now = SystemTime::now();
    let mut stats = ReapStats::default();

    for entry in shared.registry.entries() {
        // Still being wound down by its worker.
        if entry.is_held() {
            continue;
        }
        let expired = entry.read(|job| {
            job.status().is_terminal()
                && job
                    .finished_at()
                    .and_then(|at| now.duration_since(at).ok())
                    .is_some_and(|age| age >= retention)
        });
        if expired && shared.forget(&entry).await? {
            stats.forgotten += 1;
        }
    }

    let live = shared.registry.ids();
    stats.swept = shared.store.sweep(&live, retention).await?;
    stats.swept += sweep_abandoned(&shared.config.scratch_root(), retention).await?;
    Ok(stats)
}
