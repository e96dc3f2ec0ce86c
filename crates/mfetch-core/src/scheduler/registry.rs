//! Live jobs by id, each with its own lock, cancel token and watch channel.
//!
//! An entry is held by a worker from the moment it starts until `finish` has
//! released its scratch. A held entry stays registered even when its status is
//! already terminal (a cancel flips the status before the worker winds down).

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

use crate::job::{Job, JobId, JobSnapshot};

pub(crate) struct JobEntry {
    id: JobId,
    job: Mutex<Job>,
    pub(crate) cancel: CancellationToken,
    tx: watch::Sender<JobSnapshot>,
    held: AtomicBool,
    released: Notify,
}

impl JobEntry {
    pub(crate) fn new(job: Job) -> Arc<Self> {
        let (tx, _rx) = watch::channel(job.snapshot());
        Arc::new(Self {
            id: job.id().clone(),
            job: Mutex::new(job),
            cancel: CancellationToken::new(),
            tx,
            held: AtomicBool::new(false),
            released: Notify::new(),
        })
    }

    pub(crate) fn id(&self) -> &JobId {
        &self.id
    }

    /// Runs `f` under the job lock and publishes the resulting snapshot.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut Job) -> R) -> R {
        let mut job = self.job.lock();
        let out = f(&mut job);
        self.tx.send_replace(job.snapshot());
        out
    }

    /// Reads the job under its lock without publishing.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&Job) -> R) -> R {
        f(&self.job.lock())
    }

    /// Takes something out of the job without publishing a snapshot.
    pub(crate) fn with_job<R>(&self, f: impl FnOnce(&mut Job) -> R) -> R {
        f(&mut self.job.lock())
    }

    pub(crate) fn snapshot(&self) -> JobSnapshot {
        self.job.lock().snapshot()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<JobSnapshot> {
        self.tx.subscribe()
    }

    /// A worker owns the job's scratch from here on.
    pub(crate) fn hold(&self) {
        self.held.store(true, Ordering::Release);
    }

    pub(crate) fn release(&self) {
        self.held.store(false, Ordering::Release);
        self.released.notify_waiters();
    }

    pub(crate) fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Resolves once no worker holds the job.
    pub(crate) async fn wait_released(&self) {
        loop {
            let notified = self.released.notified();
            if !self.is_held() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    jobs: Mutex<HashMap<JobId, Arc<JobEntry>>>,
}

impl Registry {
    /// Inserts unless the id is already known.
    pub(crate) fn insert(&self, entry: Arc<JobEntry>) -> bool {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(entry.id()) {
            return false;
        }
        jobs.insert(entry.id().clone(), entry);
        true
    }

    pub(crate) fn get(&self, id: &JobId) -> Option<Arc<JobEntry>> {
        self.jobs.lock().get(id).cloned()
    }

    pub(crate) fn remove(&self, id: &JobId) -> Option<Arc<JobEntry>> {
        self.jobs.lock().remove(id)
    }

    /// Whether `entry` itself (not just its id) is still registered.
    pub(crate) fn contains(&self, entry: &Arc<JobEntry>) -> bool {
        self.jobs
            .lock()
            .get(entry.id())
            .is_some_and(|known| Arc::ptr_eq(known, entry))
    }

    /// Removes `entry` unless its id has since been taken by another job.
    pub(crate) fn remove_entry(&self, entry: &Arc<JobEntry>) -> bool {
        let mut jobs = self.jobs.lock();
        match jobs.get(entry.id()) {
            Some(known) if Arc::ptr_eq(known, entry) => {
                jobs.remove(entry.id());
                true
            }
            _ => false,
        }
    }

    pub(crate) fn ids(&self) -> HashSet<JobId> {
        self.jobs.lock().keys().cloned().collect()
    }

    pub(crate) fn entries(&self) -> Vec<Arc<JobEntry>> {
        self.jobs.lock().values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobRequest, JobStatus, OutputFormat};

    fn entry(id: &str) -> Arc<JobEntry> {
        let req = JobRequest::with_id(JobId::parse(id).unwrap(), "https://example.com/", OutputFormat::Raw);
        JobEntry::new(Job::new(req))
    }

    #[test]
    fn update_publishes_snapshot() {
        let e = entry("a");
        let rx = e.subscribe();
        assert_eq!(rx.borrow().status, JobStatus::Queued);
        e.update(|job| job.start()).unwrap();
        assert_eq!(rx.borrow().status, JobStatus::Fetching);
        assert_eq!(e.read(|job| job.status()), JobStatus::Fetching);
    }

    #[test]
    fn duplicate_ids_are_refused() {
        let reg = Registry::default();
        assert!(reg.insert(entry("a")));
        assert!(!reg.insert(entry("a")));
        assert_eq!(reg.len(), 1);
        assert!(reg.ids().contains(&JobId::parse("a").unwrap()));
        assert!(reg.remove(&JobId::parse("a").unwrap()).is_some());
        assert!(reg.get(&JobId::parse("a").unwrap()).is_none());
    }

    #[test]
    fn remove_entry_ignores_a_newer_job_with_the_same_id() {
        let reg = Registry::default();
        let old = entry("a");
        assert!(reg.insert(Arc::clone(&old)));
        assert!(reg.remove_entry(&old));

        let new = entry("a");
        assert!(reg.insert(Arc::clone(&new)));
        assert!(!reg.contains(&old));
        assert!(!reg.remove_entry(&old));
        assert!(reg.contains(&new));
    }

    #[tokio::test]
    async fn wait_released_blocks_while_held() {
        let e = entry("a");
        e.wait_released().await;

        e.hold();
        assert!(e.is_held());
        let waiter = {
            let e = Arc::clone(&e);
            tokio::spawn(async move { e.wait_released().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        e.release();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(!e.is_held());
    }
}
