//! Job scheduler and worker pool.
//!
//! `submit` validates and enqueues without blocking (a full queue is reported
//! as backpressure); N supervised workers pop jobs in FIFO order and drive
//! them through fetch and transcode. A central [`ProcessBudget`] caps
//! simultaneous external processes at N, and a reaper enforces retention.

mod handle;
mod pipeline;
mod pool;
mod queue;
mod reaper;
mod registry;

use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::artifact::{sweep_abandoned, ArtifactStore, InstanceDir, StoreError};
use crate::config::PipelineConfig;
use crate::job::{Job, JobId, JobRequest, JobSnapshot, JobStatus};
use crate::policy::ValidationError;
use crate::process::{LimitedRunner, ProcessBudget, ProcessRunner};
use crate::stages::{Fetcher, Transcoder};

pub use handle::JobHandle;
pub use reaper::ReapStats;

use queue::{JobQueue, PushError};
use registry::{JobEntry, Registry};

/// Buffered completion events per subscriber before it starts lagging.
const EVENT_BUFFER: usize = 256;

/// Why a submission was refused. Nothing was queued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("queue full ({capacity} jobs waiting), retry later")]
    QueueFull { capacity: usize },
    #[error("job id {0} is already in use")]
    DuplicateId(JobId),
    #[error("scheduler is shutting down")]
    ShuttingDown,
}

/// Point-in-time pool gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Jobs not yet acknowledged or reaped.
    pub tracked: usize,
    pub queued: usize,
    pub running: usize,
    pub workers: usize,
    /// External processes running right now.
    pub active_processes: usize,
    /// Highest number of simultaneous external processes seen.
    pub peak_processes: usize,
    pub scratch_bytes: u64,
    pub worker_restarts: usize,
}

pub(crate) struct Shared {
    config: PipelineConfig,
    store: Arc<ArtifactStore>,
    fetcher: Fetcher,
    transcoder: Transcoder,
    budget: Arc<ProcessBudget>,
    queue: JobQueue,
    registry: Registry,
    events: broadcast::Sender<JobSnapshot>,
    accepting: AtomicBool,
    running: AtomicUsize,
    worker_restarts: AtomicUsize,
    shutdown: CancellationToken,
    _instance: InstanceDir,
}

impl Shared {
    fn cancel(&self, id: &JobId) -> bool {
        let Some(entry) = self.registry.get(id) else {
            return false;
        };
        let previous = entry.update(|job| {
            let previous = job.status();
            match job.cancel() {
                Ok(()) => {
                    entry.cancel.cancel();
                    Some(previous)
                }
                Err(_) => None,
            }
        });
        match previous {
            None => false,
            Some(JobStatus::Queued) => {
                self.queue.remove(id);
                info!(job_id = %id, "queued job cancelled");
                self.publish_completion(entry.snapshot());
                true
            }
            Some(status) => {
                info!(job_id = %id, from = %status, "running job cancelled");
                true
            }
        }
    }

    fn publish_completion(&self, snapshot: JobSnapshot) {
        if self.events.send(snapshot).is_err() {
            debug!("no completion subscribers");
        }
    }

    /// Removes the job's scratch and drops it from the registry. The caller
    /// makes sure no worker holds it. `false` if it was already forgotten.
    async fn forget(&self, entry: &Arc<JobEntry>) -> Result<bool, StoreError> {
        // While the entry is registered its id cannot be reused, so the
        // directory removed here is still this job's.
        if !self.registry.contains(entry) {
            return Ok(false);
        }
        self.store.cleanup(entry.id()).await?;
        if !self.registry.remove_entry(entry) {
            return Ok(false);
        }
        entry.update(Job::release_artifacts);
        debug!(job_id = %entry.id(), "job forgotten");
        Ok(true)
    }
}

/// Owns the worker pool, the queue and the job registry.
pub struct Scheduler {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Claims a private namespace under the scratch root, removes namespaces
    /// whose process has exited, and starts the workers and the reaper.
    pub async fn start(config: PipelineConfig, runner: Arc<dyn ProcessRunner>) -> Result<Self, StoreError> {
        let root = config.scratch_root();
        let instance = InstanceDir::claim(&root)?;
        let swept = sweep_abandoned(&root, Duration::ZERO).await?;
        if swept > 0 {
            info!(swept, root = %root.display(), "removed scratch left by a previous run");
        }
        let store = Arc::new(ArtifactStore::new(instance.path(), config.max_scratch_bytes)?);

        let budget = Arc::new(ProcessBudget::new(config.workers));
        let limited: Arc<dyn ProcessRunner> = Arc::new(LimitedRunner::new(runner, Arc::clone(&budget)));
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let shared = Arc::new(Shared {
            fetcher: Fetcher::new(&config, Arc::clone(&limited), Arc::clone(&store)),
            transcoder: Transcoder::new(&config, limited, Arc::clone(&store)),
            queue: JobQueue::new(config.queue_capacity),
            registry: Registry::default(),
            events,
            accepting: AtomicBool::new(true),
            running: AtomicUsize::new(0),
            worker_restarts: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
            _instance: instance,
            budget,
            store,
            config,
        });

        let workers = shared.config.workers.max(1);
        let mut tasks = Vec::with_capacity(workers + 1);
        for slot in 0..workers {
            tasks.push(tokio::spawn(pool::supervise_slot(Arc::clone(&shared), slot)));
        }
        tasks.push(tokio::spawn(reaper::reaper_loop(Arc::clone(&shared))));
        info!(
            workers,
            queue_capacity = shared.queue.capacity(),
            scratch = %shared.store.root().display(),
            "scheduler started"
        );
        Ok(Self {
            shared,
            tasks: Mutex::new(tasks),
        })
    }

    /// Validates and enqueues a request. Never waits for queue space.
    pub fn submit(&self, request: JobRequest) -> Result<JobHandle, SubmitError> {
        if !self.shared.accepting.load(Ordering::Acquire) {
            return Err(SubmitError::ShuttingDown);
        }
        self.shared.fetcher.policy().validate(request.url())?;

        let id = request.id().clone();
        let entry = JobEntry::new(Job::new(request));
        if !self.shared.registry.insert(Arc::clone(&entry)) {
            return Err(SubmitError::DuplicateId(id));
        }
        if let Err(e) = self.shared.queue.try_push(id.clone()) {
            self.shared.registry.remove(&id);
            return Err(match e {
                PushError::Full => {
                    warn!(job_id = %id, "queue full, rejecting job");
                    SubmitError::QueueFull {
                        capacity: self.shared.queue.capacity(),
                    }
                }
                PushError::Closed => SubmitError::ShuttingDown,
            });
        }
        debug!(job_id = %id, "job queued");
        Ok(JobHandle::new(id, entry.subscribe(), Arc::clone(&self.shared)))
    }

    /// Cancels a queued or running job. `false` if unknown or already terminal.
    pub fn cancel(&self, id: &JobId) -> bool {
        self.shared.cancel(id)
    }

    pub fn status(&self, id: &JobId) -> Option<JobSnapshot> {
        self.shared.registry.get(id).map(|entry| entry.snapshot())
    }

    /// Opens the job's deliverable: the final artifact, or the raw one after
    /// a failed transcode.
    pub async fn open_for_read(&self, id: &JobId) -> Result<tokio::fs::File, StoreError> {
        let entry = self
            .shared
            .registry
            .get(id)
            .ok_or_else(|| StoreError::UnknownJob(id.to_string()))?;
        let info = entry
            .read(|job| job.deliverable().map(|a| a.info()))
            .ok_or_else(|| StoreError::NotDeliverable(id.to_string()))?;
        self.shared.store.open_for_read(&info).await
    }

    /// Delivery finished: remove the job's scratch and forget it.
    /// Returns `false` when the job was already gone.
    ///
    /// A cancelled job is terminal at once but its worker may still be
    /// winding down; this waits until the worker has let go of the scratch,
    /// so the id is only freed for reuse afterwards.
    pub async fn acknowledge(&self, id: &JobId) -> Result<bool, StoreError> {
        let Some(entry) = self.shared.registry.get(id) else {
            return Ok(false);
        };
        if !entry.read(|job| job.status().is_terminal()) {
            return Err(StoreError::NotDeliverable(id.to_string()));
        }
        entry.wait_released().await;
        self.shared.forget(&entry).await
    }

    /// Terminal snapshots of every job, in completion order.
    pub fn subscribe(&self) -> broadcast::Receiver<JobSnapshot> {
        self.shared.events.subscribe()
    }

    /// This scheduler's own namespace under the scratch root.
    pub fn scratch_dir(&self) -> &Path {
        self.shared.store.root()
    }

    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        PoolStats {
            tracked: shared.registry.len(),
            queued: shared.queue.len(),
            running: shared.running.load(Ordering::Acquire),
            workers: shared.config.workers,
            active_processes: shared.budget.in_use(),
            peak_processes: shared.budget.peak(),
            scratch_bytes: shared.store.bytes_in_use(),
            worker_restarts: shared.worker_restarts.load(Ordering::Relaxed),
        }
    }

    /// Runs one retention pass now.
    pub async fn reap(&self) -> Result<ReapStats, StoreError> {
        reaper::reap_once(&self.shared).await
    }

    /// Stops accepting work, cancels queued and running jobs, and waits for
    /// the workers and the reaper to exit.
    pub async fn shutdown(&self) {
        let shared = &self.shared;
        if !shared.accepting.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("scheduler shutting down");
        for id in shared.queue.close() {
            shared.cancel(&id);
        }
        for entry in shared.registry.entries() {
            shared.cancel(entry.id());
        }
        shared.budget.close();
        shared.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("scheduler task ended abnormally: {}", e);
            }
        }
        info!("scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
        self.shared.queue.close();
        for task in self.tasks.lock().iter() {
            task.abort();
        }
    }
}
