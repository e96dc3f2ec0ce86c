//! `mfetch fetch` – run URLs through the worker pool and copy the results out.

use anyhow::{bail, Context, Result};
use mfetch_core::config::PipelineConfig;
use mfetch_core::job::JobId;
use mfetch_core::{
    JobRequest, JobSnapshot, JobStatus, OutputFormat, Scheduler, SubmitError, SystemRunner,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

pub async fn run_fetch(
    cfg: PipelineConfig,
    urls: &[String],
    format: OutputFormat,
    out_dir: &Path,
) -> Result<()> {
    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("creating output dir {}", out_dir.display()))?;

    let scheduler = Scheduler::start(cfg, Arc::new(SystemRunner::new())).await?;
    let mut events = scheduler.subscribe();

    let mut failed = 0usize;
    let mut pending: HashMap<JobId, String> = HashMap::new();
    for url in urls {
        match scheduler.submit(JobRequest::new(url.as_str(), format)) {
            Ok(handle) => {
                tracing::debug!(job_id = %handle.id(), url = %url, "submitted");
                pending.insert(handle.id().clone(), url.clone());
            }
            Err(SubmitError::QueueFull { .. }) => {
                failed += 1;
                println!("{:<14} busy, retry later  {}", "-", url);
            }
            Err(e) => {
                failed += 1;
                println!("{:<14} rejected: {}  {}", "-", e, url);
            }
        }
    }

    while !pending.is_empty() {
        let snap = match events.recv().await {
            Ok(snap) => snap,
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "completion events lagged, polling job status");
                let done: Vec<JobSnapshot> = pending
                    .keys()
                    .filter_map(|id| scheduler.status(id))
                    .filter(|s| s.status.is_terminal())
                    .collect();
                for snap in done {
                    pending.remove(&snap.id);
                    if !report(&scheduler, &snap, out_dir).await {
                        failed += 1;
                    }
                }
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if pending.remove(&snap.id).is_none() {
            continue;
        }
        if !report(&scheduler, &snap, out_dir).await {
            failed += 1;
        }
    }

    scheduler.shutdown().await;
    if failed > 0 {
        bail!("{} of {} job(s) did not complete", failed, urls.len());
    }
    Ok(())
}

/// Prints one line for a finished job, copies its file out and acknowledges
/// it. Returns `true` only for a ready job whose file was delivered.
async fn report(scheduler: &Scheduler, snap: &JobSnapshot, out_dir: &Path) -> bool {
    let id = &snap.id;
    let mut ok = snap.status == JobStatus::Ready;
    match snap.deliverable() {
        Some(info) => {
            let dest = destination(out_dir, id, &info.path);
            match deliver(scheduler, id, &dest).await {
                Ok(()) => {
                    match &snap.error {
                        None => println!("{:<14} ready      {}", id.as_str(), dest.display()),
                        Some(err) => println!(
                            "{:<14} degraded   {} ({})",
                            id.as_str(),
                            dest.display(),
                            err.kind.name()
                        ),
                    }
                    if let Some(caption) = &snap.caption {
                        println!("{:<14}            {}", "", caption.lines().next().unwrap_or(""));
                    }
                }
                Err(e) => {
                    ok = false;
                    tracing::warn!(job_id = %id, "delivery failed: {:#}", e);
                    println!("{:<14} {:<10} delivery: {:#}", id.as_str(), "failed", e);
                }
            }
        }
        None => match &snap.error {
            Some(err) => println!(
                "{:<14} {:<10} {}: {}",
                id.as_str(),
                snap.status.as_str(),
                err.kind.name(),
                err.kind
            ),
            None => println!("{:<14} {}", id.as_str(), snap.status.as_str()),
        },
    }
    if let Err(e) = scheduler.acknowledge(id).await {
        tracing::warn!(job_id = %id, "could not release scratch: {}", e);
    }
    ok
}

/// Copies the job's deliverable to `dest`.
async fn deliver(scheduler: &Scheduler, id: &JobId, dest: &Path) -> Result<()> {
    let mut src = scheduler.open_for_read(id).await?;
    let mut dst = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("creating {}", dest.display()))?;
    tokio::io::copy(&mut src, &mut dst)
        .await
        .with_context(|| format!("copying to {}", dest.display()))?;
    Ok(())
}

/// `<out>/<job id>-<artifact file name>`; job ids keep parallel downloads apart.
fn destination(out_dir: &Path, id: &JobId, artifact: &Path) -> PathBuf {
    let name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "media".to_string());
    out_dir.join(format!("{}-{}", id, name))
}
