use std::sync::Arc;
use tokio::sync::watch;

use super::Shared;
use crate::job::{JobId, JobSnapshot};

/// Caller's view of one submitted job.
pub struct JobHandle {
    id: JobId,
    rx: watch::Receiver<JobSnapshot>,
    shared: Arc<Shared>,
}

impl JobHandle {
    pub(crate) fn new(id: JobId, rx: watch::Receiver<JobSnapshot>, shared: Arc<Shared>) -> Self {
        Self { id, rx, shared }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Latest published snapshot.
    pub fn status(&self) -> JobSnapshot {
        self.rx.borrow().clone()
    }

    /// Waits until the job reaches a terminal state.
    pub async fn wait(&mut self) -> JobSnapshot {
        if let Ok(snap) = self.rx.wait_for(|s| s.status.is_terminal()).await {
            return snap.clone();
        }
        // Job was forgotten; the last value is all there is.
        let snap = self.rx.borrow().clone();
        snap
    }

    /// Receiver that sees every status change.
    pub fn watch(&self) -> watch::Receiver<JobSnapshot> {
        self.rx.clone()
    }

    pub fn cancel(&self) -> bool {
        self.shared.cancel(&self.id)
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("status", &self.rx.borrow().status)
            .finish()
    }
}
