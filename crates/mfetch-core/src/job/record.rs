//! The mutable job record and its published snapshot.

use std::time::SystemTime;

use super::error::JobError;
use super::model::{JobId, JobRequest, OutputFormat};
use super::state::{InvalidTransition, JobEvent, JobStatus};
use crate::artifact::{Artifact, ArtifactInfo};

/// One request threaded through fetch, transcode and delivery.
///
/// Status only changes through [`JobStatus::apply`]. Artifacts handed to a
/// job whose transition is rejected are dropped here; their files go away
/// with the job's scratch directory.
#[derive(Debug)]
pub struct Job {
    request: JobRequest,
    status: JobStatus,
    raw: Option<Artifact>,
    final_artifact: Option<Artifact>,
    error: Option<JobError>,
    caption: Option<String>,
    started_at: Option<SystemTime>,
    finished_at: Option<SystemTime>,
}

/// Clonable view of a job, published on every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub id: JobId,
    pub url: String,
    pub format: OutputFormat,
    pub status: JobStatus,
    pub error: Option<JobError>,
    pub caption: Option<String>,
    pub raw: Option<ArtifactInfo>,
    pub final_artifact: Option<ArtifactInfo>,
    pub submitted_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
}

impl JobSnapshot {
    /// Artifact the ingress adapter should deliver, if any.
    pub fn deliverable(&self) -> Option<&ArtifactInfo> {
        match self.status {
            JobStatus::Ready => self.final_artifact.as_ref(),
            JobStatus::Failed if self.error.as_ref().is_some_and(JobError::is_degraded) => {
                self.raw.as_ref()
            }
            _ => None,
        }
    }
}

impl Job {
    pub fn new(request: JobRequest) -> Self {
        Self {
            request,
            status: JobStatus::Queued,
            raw: None,
            final_artifact: None,
            error: None,
            caption: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn id(&self) -> &JobId {
        self.request.id()
    }

    pub fn request(&self) -> &JobRequest {
        &self.request
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn raw(&self) -> Option<&Artifact> {
        self.raw.as_ref()
    }

    pub fn final_artifact(&self) -> Option<&Artifact> {
        self.final_artifact.as_ref()
    }

    pub fn error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    pub fn caption(&self) -> Option<&str> {
        self.caption.as_deref()
    }

    pub fn finished_at(&self) -> Option<SystemTime> {
        self.finished_at
    }

    fn apply(&mut self, event: JobEvent) -> Result<(), InvalidTransition> {
        let next = self.status.apply(event)?;
        self.status = next;
        if event == JobEvent::Start {
            self.started_at = Some(SystemTime::now());
        }
        if next.is_terminal() {
            self.finished_at = Some(SystemTime::now());
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        self.apply(JobEvent::Start)
    }

    pub fn fetched(&mut self, raw: Artifact, caption: Option<String>) -> Result<(), InvalidTransition> {
        self.apply(JobEvent::FetchOk)?;
        self.raw = Some(raw);
        self.caption = caption;
        Ok(())
    }

    /// Takes the raw artifact out for the transcode stage.
    pub fn take_raw(&mut self) -> Option<Artifact> {
        self.raw.take()
    }

    pub fn transcoded(&mut self, output: Artifact) -> Result<(), InvalidTransition> {
        self.apply(JobEvent::TranscodeOk)?;
        self.final_artifact = Some(output);
        Ok(())
    }

    pub fn fetch_failed(&mut self, error: JobError) -> Result<(), InvalidTransition> {
        self.apply(JobEvent::FetchErr)?;
        self.error = Some(error);
        Ok(())
    }

    /// Transcode failure keeps the raw artifact for degraded delivery.
    pub fn transcode_failed(&mut self, raw: Artifact, error: JobError) -> Result<(), InvalidTransition> {
        self.apply(JobEvent::TranscodeErr)?;
        self.raw = Some(raw);
        self.error = Some(error);
        Ok(())
    }

    pub fn crashed(&mut self, error: JobError) -> Result<(), InvalidTransition> {
        self.apply(JobEvent::Crash)?;
        self.error = Some(error);
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), InvalidTransition> {
        self.apply(JobEvent::Cancel)
    }

    /// Forget artifacts after their files were removed. Status is untouched.
    pub fn release_artifacts(&mut self) {
        self.raw = None;
        self.final_artifact = None;
    }

    /// Final artifact when ready, raw artifact on a degraded transcode failure.
    pub fn deliverable(&self) -> Option<&Artifact> {
        match self.status {
            JobStatus::Ready => self.final_artifact.as_ref(),
            JobStatus::Failed if self.error.as_ref().is_some_and(JobError::is_degraded) => {
                self.raw.as_ref()
            }
            _ => None,
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id().clone(),
            url: self.request.url().to_string(),
            format: self.request.format(),
            status: self.status,
            error: self.error.clone(),
            caption: self.caption.clone(),
            raw: self.raw.as_ref().map(Artifact::info),
            final_artifact: self.final_artifact.as_ref().map(Artifact::info),
            submitted_at: self.request.submitted_at(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactStore, ScratchDir};
    use crate::stages::{FetchError, TranscodeError};

    fn request() -> JobRequest {
        JobRequest::with_id(
            JobId::parse("rec").unwrap(),
            "https://example.com/v",
            OutputFormat::Audio,
        )
    }

    async fn scratch(store: &ArtifactStore) -> ScratchDir {
        store.create_scratch(&JobId::parse("rec").unwrap()).await.unwrap()
    }

    async fn artifact(store: &ArtifactStore, dir: &ScratchDir, name: &str, bytes: usize) -> Artifact {
        std::fs::write(dir.join(name), vec![0u8; bytes]).unwrap();
        store.adopt(dir, dir.join(name)).await.unwrap()
    }

    #[tokio::test]
    async fn happy_path_ends_ready_with_only_final() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(root.path(), 10_000).unwrap();
        let dir = scratch(&store).await;
        let mut job = Job::new(request());
        job.start().unwrap();
        assert!(job.snapshot().started_at.is_some());
        job.fetched(artifact(&store, &dir, "media.webm", 10).await, Some("cap".to_string()))
            .unwrap();
        assert_eq!(job.status(), JobStatus::Transcoding);
        let raw = job.take_raw().unwrap();
        drop(raw);
        job.transcoded(artifact(&store, &dir, "output.m4a", 500).await).unwrap();

        let snap = job.snapshot();
        assert_eq!(snap.status, JobStatus::Ready);
        assert!(snap.raw.is_none());
        assert_eq!(snap.final_artifact.as_ref().map(|a| a.size), Some(500));
        assert_eq!(snap.deliverable().map(|a| a.size), Some(500));
        assert_eq!(snap.caption.as_deref(), Some("cap"));
        assert!(snap.finished_at.is_some());
        assert_eq!(job.deliverable().map(Artifact::size), Some(500));
    }

    #[tokio::test]
    async fn transcode_failure_delivers_raw() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(root.path(), 10_000).unwrap();
        let dir = scratch(&store).await;
        let mut job = Job::new(request());
        job.start().unwrap();
        job.fetched(artifact(&store, &dir, "media.webm", 10).await, None).unwrap();
        let raw = job.take_raw().unwrap();
        let err = JobError::from_transcode(job.id(), TranscodeError::Timeout);
        job.transcode_failed(raw, err).unwrap();

        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.deliverable().map(Artifact::size), Some(10));
        assert!(matches!(
            job.error().map(|e| &e.kind),
            Some(crate::job::FailureKind::Transcode(_))
        ));
    }

    #[test]
    fn fetch_failure_has_nothing_to_deliver() {
        let mut job = Job::new(request());
        job.start().unwrap();
        job.fetch_failed(JobError::from_fetch(job.id(), FetchError::Timeout))
            .unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.deliverable().is_none());
        assert!(job.snapshot().deliverable().is_none());
    }

    #[test]
    fn terminal_jobs_reject_further_events() {
        let mut job = Job::new(request());
        job.cancel().unwrap();
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert!(job.start().is_err());
        assert!(job.cancel().is_err());
        assert!(job
            .crashed(JobError::internal(job.id(), "x"))
            .is_err());
        assert!(job.error().is_none());
    }
}
