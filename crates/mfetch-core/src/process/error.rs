//! Process runner error types.

use std::fmt;
use std::io;

/// The external command could not be run at all. Indicates environment
/// misconfiguration rather than bad input, so callers alert instead of retrying.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("{program}: executable not found")]
    NotFound { program: String },
    #[error("{program}: permission denied")]
    PermissionDenied { program: String },
    #[error("{program}: working directory unavailable: {dir}")]
    WorkingDir { program: String, dir: String },
    #[error("{program}: failed to spawn: {message}")]
    Spawn { program: String, message: String },
    #[error("{program}: failed waiting for process: {message}")]
    Wait { program: String, message: String },
}

impl ExecutionError {
    pub fn from_spawn(program: &str, err: &io::Error) -> Self {
        let program = program.to_string();
        match err.kind() {
            io::ErrorKind::NotFound => ExecutionError::NotFound { program },
            io::ErrorKind::PermissionDenied => ExecutionError::PermissionDenied { program },
            _ => ExecutionError::Spawn {
                program,
                message: err.to_string(),
            },
        }
    }

    pub fn program(&self) -> &str {
        match self {
            ExecutionError::NotFound { program }
            | ExecutionError::PermissionDenied { program }
            | ExecutionError::WorkingDir { program, .. }
            | ExecutionError::Spawn { program, .. }
            | ExecutionError::Wait { program, .. } => program,
        }
    }
}

/// The tool ran and reported failure (non-zero exit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFailure {
    pub program: String,
    pub exit_code: Option<i32>,
    pub stderr_tail: String,
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "{} exited with {}: {}", self.program, code, self.stderr_tail),
            None => write!(f, "{} exited with signal: {}", self.program, self.stderr_tail),
        }
    }
}

impl std::error::Error for ToolFailure {}
