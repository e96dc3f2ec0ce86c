//! tokio-backed process runner.
//!
//! Children are spawned in their own process group (Unix) so a timeout or
//! cancellation kills the whole tree, including helpers the extractor starts
//! (e.g. an encoder used for merging formats).

use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::capture::{read_head, read_tail};
use super::{ExecutionError, Invocation, ProcessResult, ProcessRunner, STDERR_LIMIT, STDOUT_LIMIT};

/// How long to wait for pipes to drain after the child is gone.
const PIPE_DRAIN: Duration = Duration::from_secs(2);

enum Outcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Runs invocations as real child processes.
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, inv: &Invocation) -> Result<ProcessResult, ExecutionError> {
        if !inv.working_dir.is_dir() {
            return Err(ExecutionError::WorkingDir {
                program: inv.program.clone(),
                dir: inv.working_dir.display().to_string(),
            });
        }

        let started = Instant::now();
        let mut std_cmd = std::process::Command::new(&inv.program);
        std_cmd
            .args(&inv.args)
            .current_dir(&inv.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }
        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);

        debug!(program = %inv.program, args = ?inv.args_lossy(), "spawning");
        let mut child = cmd
            .spawn()
            .map_err(|e| ExecutionError::from_spawn(&inv.program, &e))?;

        let mut stdout_task = tokio::spawn(read_head(child.stdout.take(), STDOUT_LIMIT));
        let mut stderr_task = tokio::spawn(read_tail(child.stderr.take(), STDERR_LIMIT));

        let outcome = wait_bounded(&mut child, inv).await;
        let (exit_code, timed_out, cancelled) = match outcome {
            Ok(Outcome::Exited(status)) => (status.code(), false, false),
            Ok(Outcome::TimedOut) => {
                warn!(program = %inv.program, timeout_secs = inv.timeout.as_secs_f64(), "timed out, killing process tree");
                kill_tree(&mut child).await;
                (None, true, false)
            }
            Ok(Outcome::Cancelled) => {
                debug!(program = %inv.program, "cancelled, killing process tree");
                kill_tree(&mut child).await;
                (None, false, true)
            }
            Err(e) => {
                kill_tree(&mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(ExecutionError::Wait {
                    program: inv.program.clone(),
                    message: e.to_string(),
                });
            }
        };

        let stdout = match tokio::time::timeout(PIPE_DRAIN, &mut stdout_task).await {
            Ok(Ok(s)) => s,
            _ => {
                stdout_task.abort();
                String::new()
            }
        };
        let stderr_tail = match tokio::time::timeout(PIPE_DRAIN, &mut stderr_task).await {
            Ok(Ok(s)) => s,
            _ => {
                stderr_task.abort();
                String::new()
            }
        };

        let duration = started.elapsed();
        debug!(
            program = %inv.program,
            exit_code = ?exit_code,
            timed_out,
            cancelled,
            elapsed_ms = duration.as_millis() as u64,
            "process finished"
        );

        Ok(ProcessResult {
            exit_code,
            stdout,
            stderr_tail,
            duration,
            timed_out,
            cancelled,
        })
    }
}

async fn wait_bounded(child: &mut Child, inv: &Invocation) -> std::io::Result<Outcome> {
    let cancelled = async {
        match &inv.cancel {
            Some(token) => {
                token.cancelled().await;
                // Cancellation shortens the remaining timeout to the grace period.
                tokio::time::sleep(inv.cancel_grace).await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        status = child.wait() => Ok(Outcome::Exited(status?)),
        _ = tokio::time::sleep(inv.timeout) => Ok(Outcome::TimedOut),
        _ = cancelled => Ok(Outcome::Cancelled),
    }
}

async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // Negative pid targets the process group created with process_group(0).
        let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
        if rc != 0 {
            debug!(pid, "killpg failed, falling back to direct kill");
        }
    }
    if let Err(e) = child.kill().await {
        debug!("kill after exit: {}", e);
    }
}
