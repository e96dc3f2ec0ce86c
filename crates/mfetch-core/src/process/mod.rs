//! External process invocation.
//!
//! Stages never spawn tools directly; they build an [`Invocation`] (program plus
//! discrete arguments, never a shell string) and hand it to a [`ProcessRunner`].
//! [`SystemRunner`] is the tokio-backed implementation; tests substitute
//! deterministic fakes. [`LimitedRunner`] wraps any runner with the central
//! [`ProcessBudget`] so the number of simultaneous external processes is capped.

mod budget;
mod capture;
mod error;
mod system;

use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use budget::{ProcessBudget, ProcessPermit};
pub use capture::{HeadBuffer, TailBuffer};
pub use error::{ExecutionError, ToolFailure};
pub use system::SystemRunner;

/// Bytes of stdout kept per run (metadata probes print JSON here).
pub const STDOUT_LIMIT: usize = 4 * 1024 * 1024;

/// Bytes of stderr kept per run (the tail; tools print the cause last).
pub const STDERR_LIMIT: usize = 16 * 1024;

/// One external command to run.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<OsString>,
    pub working_dir: PathBuf,
    pub timeout: Duration,
    /// When cancelled, the run is cut short after `cancel_grace`.
    pub cancel: Option<CancellationToken>,
    pub cancel_grace: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<String>, working_dir: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.as_ref().to_path_buf(),
            timeout,
            cancel: None,
            cancel_grace: Duration::ZERO,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken, grace: Duration) -> Self {
        self.cancel = Some(token);
        self.cancel_grace = grace;
        self
    }

    /// Arguments as UTF-8 (lossy), for logging and test assertions.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Value following `flag` in the argument list, if present.
    pub fn arg_after(&self, flag: &str) -> Option<String> {
        let args = self.args_lossy();
        let pos = args.iter().position(|a| a == flag)?;
        args.get(pos + 1).cloned()
    }
}

/// Outcome of one external run. Consumed immediately by the stage that asked for it.
#[derive(Debug, Clone, Default)]
pub struct ProcessResult {
    /// Exit code; `None` when killed by a signal or never exited on its own.
    pub exit_code: Option<i32>,
    /// Leading part of stdout, capped at [`STDOUT_LIMIT`].
    pub stdout: String,
    /// Trailing part of stderr, capped at [`STDERR_LIMIT`].
    pub stderr_tail: String,
    pub duration: Duration,
    /// The hard wall-clock timeout expired and the process tree was killed.
    pub timed_out: bool,
    /// The run was cut short because its job was cancelled.
    pub cancelled: bool,
}

impl ProcessResult {
    pub fn success(&self) -> bool {
        !self.timed_out && !self.cancelled && self.exit_code == Some(0)
    }

    /// Converts a non-zero exit into a [`ToolFailure`] carrying the stderr tail.
    pub fn check(&self, program: &str) -> Result<(), ToolFailure> {
        if self.exit_code == Some(0) {
            return Ok(());
        }
        Err(ToolFailure {
            program: program.to_string(),
            exit_code: self.exit_code,
            stderr_tail: last_lines(&self.stderr_tail, 5),
        })
    }
}

/// Last `n` non-empty lines of a tool's stderr, joined with newlines.
pub fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Capability to run an external command.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs the invocation to completion, timeout, or cancellation.
    ///
    /// Returns `Err` only when the process could not be started at all
    /// (missing binary, permission denied); tool-reported failures come back
    /// as a `ProcessResult` with a non-zero exit code.
    async fn run(&self, invocation: &Invocation) -> Result<ProcessResult, ExecutionError>;
}

/// Runner decorator that holds a [`ProcessBudget`] permit for the whole run.
pub struct LimitedRunner {
    inner: Arc<dyn ProcessRunner>,
    budget: Arc<ProcessBudget>,
}

impl LimitedRunner {
    pub fn new(inner: Arc<dyn ProcessRunner>, budget: Arc<ProcessBudget>) -> Self {
        Self { inner, budget }
    }
}

#[async_trait]
impl ProcessRunner for LimitedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessResult, ExecutionError> {
        let permit = match &invocation.cancel {
            Some(token) => tokio::select! {
                p = self.budget.acquire() => p,
                _ = token.cancelled() => None,
            },
            None => self.budget.acquire().await,
        };
        let Some(_permit) = permit else {
            // Budget closed (shutdown) or job cancelled while waiting: nothing was started.
            return Ok(ProcessResult {
                cancelled: true,
                ..ProcessResult::default()
            });
        };
        self.inner.run(invocation).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Minimal closure-backed runner for unit tests.

    use super::*;
    use parking_lot::Mutex;

    type Handler = dyn Fn(&Invocation) -> Result<ProcessResult, ExecutionError> + Send + Sync;

    pub(crate) struct FnRunner {
        handler: Box<Handler>,
        pub(crate) calls: Mutex<Vec<Invocation>>,
    }

    impl FnRunner {
        pub(crate) fn new<F>(f: F) -> Arc<Self>
        where
            F: Fn(&Invocation) -> Result<ProcessResult, ExecutionError> + Send + Sync + 'static,
        {
            Arc::new(Self {
                handler: Box::new(f),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl ProcessRunner for FnRunner {
        async fn run(&self, invocation: &Invocation) -> Result<ProcessResult, ExecutionError> {
            self.calls.lock().push(invocation.clone());
            (self.handler)(invocation)
        }
    }

    pub(crate) fn exited(code: i32, stderr: &str) -> ProcessResult {
        ProcessResult {
            exit_code: Some(code),
            stderr_tail: stderr.to_string(),
            ..ProcessResult::default()
        }
    }
}
