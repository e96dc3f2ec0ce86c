//! Job status state machine.
//!
//! `Queued -> Fetching -> Transcoding -> Ready` is the only forward path.
//! `Failed` and `Cancelled` are reachable from any non-terminal state; nothing
//! leaves a terminal state. All transitions go through [`JobStatus::apply`].

use std::fmt;

/// Current status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Queued,
    Fetching,
    Transcoding,
    Ready,
    Failed,
    Cancelled,
}

/// Event driving a status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    /// A worker picked the job up.
    Start,
    FetchOk,
    FetchErr,
    TranscodeOk,
    TranscodeErr,
    /// Worker crashed while holding the job.
    Crash,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal job transition: {from} --{event:?}-->")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub event: JobEvent,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Fetching => "fetching",
            JobStatus::Transcoding => "transcoding",
            JobStatus::Ready => "ready",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Ready | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Single transition-validation function for the whole job lifecycle.
    pub fn apply(self, event: JobEvent) -> Result<JobStatus, InvalidTransition> {
        use JobEvent::*;
        use JobStatus::*;
        let next = match (self, event) {
            (Queued, Start) => Fetching,
            (Fetching, FetchOk) => Transcoding,
            (Fetching, FetchErr) => Failed,
            (Transcoding, TranscodeOk) => Ready,
            (Transcoding, TranscodeErr) => Failed,
            (Fetching | Transcoding, Crash) => Failed,
            (Queued | Fetching | Transcoding, Cancel) => Cancelled,
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
