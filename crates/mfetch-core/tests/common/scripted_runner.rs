//! Deterministic stand-in for the extractor and encoder used by the
//! integration tests. Honors the invocation timeout and cancel token the way
//! a real child process would, and records a concurrency gauge.

use async_trait::async_trait;
use mfetch_core::config::{PipelineConfig, RetryConfig};
use mfetch_core::job::{JobId, JobSnapshot};
use mfetch_core::process::{ExecutionError, Invocation, ProcessResult, ProcessRunner};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub const EXTRACTOR: &str = "fake-extractor";
pub const ENCODER: &str = "fake-encoder";

/// What one fake tool run does.
#[derive(Debug, Clone)]
pub enum Step {
    /// Waits `delay` (cut short by cancellation), then writes `bytes` and exits 0.
    Succeed { bytes: usize, delay: Duration },
    Fail { code: i32, stderr: String },
    /// Never exits on its own; ends at the invocation timeout or on cancel.
    Hang,
    /// The binary is missing.
    Missing,
    Panic,
}

impl Step {
    pub fn ok(bytes: usize) -> Self {
        Step::Succeed {
            bytes,
            delay: Duration::ZERO,
        }
    }

    pub fn slow(bytes: usize, delay: Duration) -> Self {
        Step::Succeed { bytes, delay }
    }

    pub fn fail(code: i32, stderr: &str) -> Self {
        Step::Fail {
            code,
            stderr: stderr.to_string(),
        }
    }
}

/// Behaviour of the three tool runs a job can make.
#[derive(Debug, Clone)]
pub struct Script {
    pub probe: Step,
    pub download: Step,
    pub encode: Step,
}

impl Script {
    pub fn ok(raw_bytes: usize, final_bytes: usize) -> Self {
        Self {
            probe: Step::ok(raw_bytes),
            download: Step::ok(raw_bytes),
            encode: Step::ok(final_bytes),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Probe,
    Download,
    Encode,
}

/// Fake runner with an invocation counter and a concurrency gauge.
pub struct ScriptedRunner {
    default: Script,
    by_url: HashMap<String, Script>,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    log: Mutex<Vec<Invocation>>,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedRunner {
    pub fn new(default: Script) -> Self {
        Self {
            default,
            by_url: HashMap::new(),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Extractor behaviour for one URL; encoder runs always use the default.
    pub fn with_url(mut self, url: &str, script: Script) -> Self {
        self.by_url.insert(url.to_string(), script);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.log.lock().clone()
    }

    fn step_for(&self, inv: &Invocation) -> (Kind, Step) {
        let args = inv.args_lossy();
        if inv.program == ENCODER {
            return (Kind::Encode, self.default.encode.clone());
        }
        let url = args.last().cloned().unwrap_or_default();
        let script = self.by_url.get(&url).unwrap_or(&self.default);
        if args.iter().any(|a| a == "--dump-json") {
            (Kind::Probe, script.probe.clone())
        } else {
            (Kind::Download, script.download.clone())
        }
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, inv: &Invocation) -> Result<ProcessResult, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(inv.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _active = ActiveGuard(&self.active);

        let (kind, step) = self.step_for(inv);
        match step {
            Step::Missing => Err(ExecutionError::NotFound {
                program: inv.program.clone(),
            }),
            Step::Panic => panic!("scripted tool crash"),
            Step::Fail { code, stderr } => Ok(ProcessResult {
                exit_code: Some(code),
                stderr_tail: stderr,
                ..ProcessResult::default()
            }),
            Step::Hang => Ok(until_timeout(inv).await),
            Step::Succeed { bytes, delay } => {
                if delay >= inv.timeout {
                    return Ok(until_timeout(inv).await);
                }
                if let Some(cut) = wait_out(inv, delay).await {
                    return Ok(cut);
                }
                Ok(produce(inv, kind, bytes))
            }
        }
    }
}

async fn until_timeout(inv: &Invocation) -> ProcessResult {
    wait_out(inv, inv.timeout).await.unwrap_or(ProcessResult {
        timed_out: true,
        duration: inv.timeout,
        ..ProcessResult::default()
    })
}

/// Sleeps up to `dur`; returns a cancelled result if the job is cancelled first.
async fn wait_out(inv: &Invocation, dur: Duration) -> Option<ProcessResult> {
    let cancelled = async {
        match &inv.cancel {
            Some(token) => {
                token.cancelled().await;
                tokio::time::sleep(inv.cancel_grace).await;
            }
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = tokio::time::sleep(dur) => None,
        _ = cancelled => Some(ProcessResult {
            cancelled: true,
            ..ProcessResult::default()
        }),
    }
}

fn produce(inv: &Invocation, kind: Kind, bytes: usize) -> ProcessResult {
    match kind {
        Kind::Probe => ProcessResult {
            exit_code: Some(0),
            stdout: format!(
                r#"{{"title":"clip","description":"a caption","filesize":{},"extractor":"fake"}}"#,
                bytes
            ),
            ..ProcessResult::default()
        },
        Kind::Download => {
            let template = inv.arg_after("-o").unwrap_or_default();
            let path = template.replace("%(ext)s", "webm");
            std::fs::write(&path, vec![1u8; bytes]).expect("write fake download");
            ProcessResult {
                exit_code: Some(0),
                ..ProcessResult::default()
            }
        }
        Kind::Encode => {
            let out = inv.args_lossy().last().cloned().unwrap_or_default();
            std::fs::write(&out, vec![2u8; bytes]).expect("write fake encode");
            ProcessResult {
                exit_code: Some(0),
                ..ProcessResult::default()
            }
        }
    }
}

/// Small, fast configuration rooted in `root`.
pub fn test_config(root: &Path, workers: usize, queue_capacity: usize) -> PipelineConfig {
    PipelineConfig {
        workers,
        queue_capacity,
        fetch_timeout_secs: 30,
        transcode_timeout_secs: 30,
        probe_timeout_secs: 30,
        max_artifact_bytes: 1_000_000,
        max_scratch_bytes: 10_000_000,
        scratch_root: Some(root.to_path_buf()),
        retention_secs: 3600,
        reap_interval_secs: 3600,
        extractor: Some(mfetch_core::config::ExtractorConfig {
            program: EXTRACTOR.to_string(),
            extra_args: Vec::new(),
        }),
        encoder: Some(mfetch_core::config::EncoderConfig {
            program: ENCODER.to_string(),
        }),
        retry: Some(RetryConfig {
            max_attempts: 2,
            base_delay_secs: 0.0,
            max_delay_secs: 0,
        }),
        ..PipelineConfig::default()
    }
}

/// Waits for the completion event of `id` (published after cleanup).
pub async fn completion(rx: &mut broadcast::Receiver<JobSnapshot>, id: &JobId) -> JobSnapshot {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(snap) if &snap.id == id => return snap,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("job did not complete in time")
}
