//! Integration test: jobs driven end to end through the scheduler with a
//! scripted extractor and encoder.
//!
//! Covers the happy paths (audio, raw), stage failures (timeout, missing
//! binary, failed transcode with raw fallback), URL rejection before any
//! process starts, and delivery plus acknowledgement.

mod common;

use common::scripted_runner::{completion, test_config, Script, ScriptedRunner, Step};
use mfetch_core::job::{FailureKind, Stage};
use mfetch_core::stages::{FetchError, TranscodeError};
use mfetch_core::{JobRequest, JobStatus, OutputFormat, Scheduler, SubmitError};
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::AsyncReadExt;

const URL: &str = "https://media.example.com/watch/1";

async fn read_all(mut file: tokio::fs::File) -> Vec<u8> {
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await.unwrap();
    buf
}

#[tokio::test]
async fn audio_job_is_fetched_transcoded_and_raw_removed() {
    let root = tempdir().unwrap();
    let runner = ScriptedRunner::new(Script::ok(10, 500)).into_arc();
    let sched = Scheduler::start(test_config(root.path(), 2, 4), runner.clone())
        .await
        .unwrap();

    let mut handle = sched
        .submit(JobRequest::new(URL, OutputFormat::Audio))
        .unwrap();
    let snap = handle.wait().await;

    assert_eq!(snap.status, JobStatus::Ready);
    assert!(snap.error.is_none());
    assert!(snap.raw.is_none(), "raw artifact must be released after transcode");
    let final_info = snap.final_artifact.clone().expect("final artifact");
    assert_eq!(final_info.size, 500);
    assert!(final_info.path.ends_with("output.m4a"));
    assert_eq!(snap.caption.as_deref().map(|c| c.is_empty()), Some(false));

    let scratch = sched.scratch_dir().join(handle.id().as_str());
    assert!(!scratch.join("media.webm").exists());
    assert_eq!(sched.stats().scratch_bytes, 500);

    // probe, download, encode
    assert_eq!(runner.calls(), 3);
    let encode = &runner.invocations()[2];
    assert_eq!(encode.program, common::scripted_runner::ENCODER);
    assert_eq!(encode.working_dir, scratch);

    let body = read_all(sched.open_for_read(handle.id()).await.unwrap()).await;
    assert_eq!(body.len(), 500);
    sched.shutdown().await;
}

#[tokio::test]
async fn raw_job_skips_the_encoder() {
    let root = tempdir().unwrap();
    let runner = ScriptedRunner::new(Script::ok(64, 999)).into_arc();
    let sched = Scheduler::start(test_config(root.path(), 1, 4), runner.clone())
        .await
        .unwrap();

    let mut handle = sched.submit(JobRequest::new(URL, OutputFormat::Raw)).unwrap();
    let snap = handle.wait().await;

    assert_eq!(snap.status, JobStatus::Ready);
    assert_eq!(snap.final_artifact.as_ref().map(|a| a.size), Some(64));
    assert!(runner
        .invocations()
        .iter()
        .all(|inv| inv.program == common::scripted_runner::EXTRACTOR));
    assert_eq!(runner.calls(), 2);
    sched.shutdown().await;
}

#[tokio::test]
async fn hanging_extractor_times_out_and_scratch_is_removed() {
    let root = tempdir().unwrap();
    let runner = ScriptedRunner::new(Script {
        probe: Step::Hang,
        download: Step::ok(10),
        encode: Step::ok(10),
    })
    .into_arc();
    let mut cfg = test_config(root.path(), 1, 4);
    cfg.probe_timeout_secs = 1;
    let sched = Scheduler::start(cfg, runner.clone()).await.unwrap();
    let mut events = sched.subscribe();

    let handle = sched
        .submit(JobRequest::new(URL, OutputFormat::Audio))
        .unwrap();
    let snap = completion(&mut events, handle.id()).await;

    assert_eq!(snap.status, JobStatus::Failed);
    let err = snap.error.as_ref().expect("error recorded");
    assert_eq!(err.stage, Stage::Fetch);
    assert_eq!(err.kind, FailureKind::Fetch(FetchError::Timeout));
    assert_eq!(err.kind.name(), "fetch:timeout");
    assert!(snap.deliverable().is_none());
    // Timeouts are not retried.
    assert_eq!(runner.calls(), 1);
    assert!(!sched.scratch_dir().join(handle.id().as_str()).exists());
    assert_eq!(sched.stats().scratch_bytes, 0);
    sched.shutdown().await;
}

#[tokio::test]
async fn failed_transcode_delivers_raw_artifact() {
    let root = tempdir().unwrap();
    let runner = ScriptedRunner::new(Script {
        probe: Step::ok(42),
        download: Step::ok(42),
        encode: Step::fail(1, "Conversion failed!"),
    })
    .into_arc();
    let sched = Scheduler::start(test_config(root.path(), 1, 4), runner)
        .await
        .unwrap();

    let mut handle = sched
        .submit(JobRequest::new(URL, OutputFormat::Audio))
        .unwrap();
    let snap = handle.wait().await;

    assert_eq!(snap.status, JobStatus::Failed);
    let err = snap.error.clone().unwrap();
    assert_eq!(err.stage, Stage::Transcode);
    assert!(matches!(err.kind, FailureKind::Transcode(TranscodeError::Tool(_))));
    assert!(err.is_degraded());
    assert_eq!(snap.deliverable().map(|a| a.size), Some(42));

    let body = read_all(sched.open_for_read(handle.id()).await.unwrap()).await;
    assert_eq!(body.len(), 42);
    assert!(sched.acknowledge(handle.id()).await.unwrap());
    sched.shutdown().await;
}

#[tokio::test]
async fn missing_extractor_is_an_operator_alert() {
    let root = tempdir().unwrap();
    let runner = ScriptedRunner::new(Script {
        probe: Step::Missing,
        download: Step::Missing,
        encode: Step::ok(1),
    })
    .into_arc();
    let sched = Scheduler::start(test_config(root.path(), 1, 4), runner.clone())
        .await
        .unwrap();

    let mut handle = sched.submit(JobRequest::new(URL, OutputFormat::Raw)).unwrap();
    let snap = handle.wait().await;

    assert_eq!(snap.status, JobStatus::Failed);
    let err = snap.error.unwrap();
    assert!(matches!(err.kind, FailureKind::Execution(_)));
    assert!(err.is_operator_alert());
    assert_eq!(runner.calls(), 1);
    sched.shutdown().await;
}

#[tokio::test]
async fn disallowed_url_is_rejected_before_any_process() {
    let root = tempdir().unwrap();
    let runner = ScriptedRunner::new(Script::ok(1, 1)).into_arc();
    let mut cfg = test_config(root.path(), 1, 4);
    cfg.allowed_hosts = vec!["example.com".to_string()];
    let sched = Scheduler::start(cfg, runner.clone()).await.unwrap();

    for url in [
        "http://localhost:8080/video",
        "ftp://media.example.com/x",
        "https://elsewhere.test/clip",
        "not a url",
    ] {
        let res = sched.submit(JobRequest::new(url, OutputFormat::Raw));
        assert!(
            matches!(res, Err(SubmitError::Validation(_))),
            "{url} should be rejected"
        );
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runner.calls(), 0);
    assert_eq!(sched.stats().queued, 0);
    sched.shutdown().await;
}

#[tokio::test]
async fn acknowledge_is_idempotent_and_frees_scratch() {
    let root = tempdir().unwrap();
    let runner = ScriptedRunner::new(Script::ok(10, 20)).into_arc();
    let sched = Scheduler::start(test_config(root.path(), 1, 4), runner)
        .await
        .unwrap();

    let mut handle = sched
        .submit(JobRequest::new(URL, OutputFormat::Audio))
        .unwrap();
    assert_eq!(handle.wait().await.status, JobStatus::Ready);
    let id = handle.id().clone();
    assert!(sched.scratch_dir().join(id.as_str()).is_dir());

    assert!(sched.acknowledge(&id).await.unwrap());
    assert!(!sched.acknowledge(&id).await.unwrap());
    assert!(!sched.scratch_dir().join(id.as_str()).exists());
    assert!(sched.status(&id).is_none());
    assert_eq!(sched.stats().scratch_bytes, 0);
    assert_eq!(sched.stats().tracked, 0);
    assert!(sched.open_for_read(&id).await.is_err());
    sched.shutdown().await;
}

#[tokio::test]
async fn transient_failure_is_retried_up_to_the_attempt_limit() {
    let root = tempdir().unwrap();
    let runner = ScriptedRunner::new(Script {
        probe: Step::fail(1, "ERROR: HTTP Error 503: Service Unavailable"),
        download: Step::ok(1),
        encode: Step::ok(1),
    })
    .into_arc();
    let sched = Scheduler::start(test_config(root.path(), 1, 4), runner.clone())
        .await
        .unwrap();

    let mut handle = sched.submit(JobRequest::new(URL, OutputFormat::Raw)).unwrap();
    let snap = handle.wait().await;

    // Both attempts hit the 503; the retry budget is two attempts.
    assert_eq!(snap.status, JobStatus::Failed);
    assert_eq!(snap.error.unwrap().kind.name(), "fetch:transient");
    assert_eq!(runner.calls(), 2);
    sched.shutdown().await;
}
