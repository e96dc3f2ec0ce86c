//! Drives one job through fetch and transcode.
//!
//! Every status change goes through the job lock. A cancel flips the status
//! under that same lock, so a stage finishing after a cancel simply finds its
//! transition rejected and the job stays `Cancelled`. The worker keeps its
//! hold on the entry until `finish` has dealt with the scratch directory.

use tracing::{debug, error, info, warn};

use super::registry::JobEntry;
use super::Shared;
use crate::job::{InvalidTransition, Job, JobError, JobStatus};
use crate::stages::{FetchError, MediaInfo, StageContext, TranscodeError, TranscodeFailure};

/// Runs a job popped from the queue. Returns without doing anything if the
/// job was cancelled while it waited.
pub(super) async fn run_job(shared: &Shared, entry: &JobEntry) {
    let started = advance(entry, |job| {
        job.start()?;
        entry.hold();
        Ok(())
    });
    if !started {
        return;
    }
    drive(shared, entry).await;
    finish(shared, entry).await;
}

/// Marks a job whose worker panicked as failed and releases its scratch.
pub(super) async fn fail_crashed(shared: &Shared, entry: &JobEntry, message: &str) {
    let err = JobError::internal(entry.id(), message);
    let crashed = entry.update(|job| {
        if job.status() == JobStatus::Queued {
            job.start()?;
        }
        job.crashed(err)
    });
    if let Err(e) = crashed {
        debug!(job_id = %entry.id(), "crash not recorded: {}", e);
    }
    finish(shared, entry).await;
}

fn advance(entry: &JobEntry, f: impl FnOnce(&mut Job) -> Result<(), InvalidTransition>) -> bool {
    entry.update(|job| match f(job) {
        Ok(()) => true,
        Err(e) => {
            debug!(job_id = %job.id(), "transition rejected: {}", e);
            false
        }
    })
}

async fn drive(shared: &Shared, entry: &JobEntry) {
    let id = entry.id().clone();
    let request = entry.read(|job| job.request().clone());
    let format = request.format();

    let scratch = match shared.store.create_scratch(&id).await {
        Ok(scratch) => scratch,
        Err(e) => {
            let err = JobError::from_fetch(&id, FetchError::Storage(e));
            warn!(job_id = %id, "{}", err);
            advance(entry, |job| job.fetch_failed(err));
            return;
        }
    };
    let ctx = StageContext::new(scratch, entry.cancel.clone());

    if entry.cancel.is_cancelled() {
        return;
    }
    let fetched = match shared.fetcher.fetch(request.url(), format, &ctx).await {
        Ok(out) => out,
        Err(FetchError::Cancelled) => {
            advance(entry, Job::cancel);
            return;
        }
        Err(e) => {
            let err = JobError::from_fetch(&id, e);
            warn!(job_id = %id, kind = %err.kind.name(), "{}", err);
            advance(entry, |job| job.fetch_failed(err));
            return;
        }
    };
    let caption = fetched.info.as_ref().and_then(MediaInfo::caption);
    if !advance(entry, |job| job.fetched(fetched.artifact, caption)) {
        return;
    }

    if entry.cancel.is_cancelled() {
        return;
    }
    let Some(raw) = entry.with_job(Job::take_raw) else {
        advance(entry, |job| job.crashed(JobError::internal(&id, "raw artifact missing")));
        return;
    };
    match shared.transcoder.transcode(raw, format, &ctx).await {
        Ok(output) => {
            advance(entry, |job| job.transcoded(output));
        }
        Err(TranscodeFailure {
            error: TranscodeError::Cancelled,
            ..
        }) => {
            advance(entry, Job::cancel);
        }
        Err(TranscodeFailure { raw, error }) => {
            let err = JobError::from_transcode(&id, error);
            warn!(job_id = %id, kind = %err.kind.name(), "{}; raw artifact kept", err);
            advance(entry, |job| job.transcode_failed(raw, err));
        }
    }
}

/// Releases scratch for jobs with nothing to deliver and announces the result.
async fn finish(shared: &Shared, entry: &JobEntry) {
    let id = entry.id().clone();
    let snap = entry.snapshot();
    if !snap.status.is_terminal() {
        error!(job_id = %id, status = %snap.status, "job left non-terminal");
        advance(entry, |job| {
            job.crashed(JobError::internal(&id, "worker finished without a terminal state"))
        });
    }

    let (status, deliverable) = entry.read(|job| (job.status(), job.deliverable().is_some()));
    if !deliverable {
        match shared.store.cleanup(&id).await {
            Ok(_) => entry.update(Job::release_artifacts),
            Err(e) => warn!(job_id = %id, "scratch cleanup failed: {}", e),
        }
    }

    entry.release();

    let snap = entry.snapshot();
    if let Some(err) = snap.error.as_ref().filter(|e| e.is_operator_alert()) {
        error!(job_id = %id, alert = true, "{}", err);
    }
    info!(job_id = %id, status = %status, deliverable, "job finished");
    shared.publish_completion(snap);
}
