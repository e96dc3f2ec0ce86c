//! Fixed worker pool. Each slot is a supervisor task that runs a worker loop
//! and respawns it if it panics, so capacity never silently shrinks.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info_span, Instrument};

use super::pipeline;
use super::registry::JobEntry;
use super::Shared;

type CurrentJob = Arc<Mutex<Option<Arc<JobEntry>>>>;

/// Counts a running job for as long as it is held, including during unwinding.
struct RunningGuard<'a>(&'a AtomicUsize);

impl<'a> RunningGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(super) async fn supervise_slot(shared: Arc<Shared>, slot: usize) {
    loop {
        let current: CurrentJob = Arc::new(Mutex::new(None));
        let worker = tokio::spawn(worker_loop(Arc::clone(&shared), slot, Arc::clone(&current)));
        match worker.await {
            Ok(()) => break,
            Err(e) if e.is_panic() => {
                shared.worker_restarts.fetch_add(1, Ordering::Relaxed);
                let lost = current.lock().take();
                error!(worker = slot, job_id = ?lost.as_ref().map(|entry| entry.id().to_string()), "worker panicked, replacing");
                if let Some(entry) = lost {
                    pipeline::fail_crashed(&shared, &entry, "worker panicked").await;
                }
            }
            Err(e) => {
                debug!(worker = slot, "worker task cancelled: {}", e);
                break;
            }
        }
    }
    debug!(worker = slot, "slot stopped");
}

async fn worker_loop(shared: Arc<Shared>, slot: usize, current: CurrentJob) {
    while let Some(id) = shared.queue.pop().await {
        let Some(entry) = shared.registry.get(&id) else {
            continue;
        };
        *current.lock() = Some(Arc::clone(&entry));
        {
            let _running = RunningGuard::new(&shared.running);
            let span = info_span!("job", job_id = %id, worker = slot);
            pipeline::run_job(&shared, &entry).instrument(span).await;
        }
        *current.lock() = None;
    }
    debug!(worker = slot, "queue closed, worker exiting");
}
