//! Job-level error wrapper: every stage failure carries its job and stage.

use std::fmt;

use super::JobId;
use crate::policy::ValidationError;
use crate::process::ExecutionError;
use crate::stages::{FetchError, TranscodeError};

/// Pipeline stage a failure originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetch,
    Transcode,
    /// The worker itself (panic, lost job).
    Worker,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Fetch => "fetch",
            Stage::Transcode => "transcode",
            Stage::Worker => "worker",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureKind {
    #[error(transparent)]
    Validation(ValidationError),
    #[error(transparent)]
    Fetch(FetchError),
    #[error(transparent)]
    Transcode(TranscodeError),
    /// Tool missing or unrunnable; needs an operator, not a retry.
    #[error(transparent)]
    Execution(ExecutionError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl FailureKind {
    /// Stable short name, e.g. `fetch:timeout`.
    pub fn name(&self) -> String {
        match self {
            FailureKind::Validation(_) => "validation".to_string(),
            FailureKind::Fetch(e) => format!("fetch:{}", e.kind()),
            FailureKind::Transcode(e) => format!("transcode:{}", e.kind()),
            FailureKind::Execution(_) => "execution".to_string(),
            FailureKind::Internal(_) => "internal".to_string(),
        }
    }
}

/// Failure of one job, as handed to the ingress adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("job {job_id} failed in {stage}: {kind}")]
pub struct JobError {
    pub job_id: JobId,
    pub stage: Stage,
    pub kind: FailureKind,
}

impl JobError {
    pub fn from_fetch(job_id: &JobId, err: FetchError) -> Self {
        let kind = match err {
            FetchError::Validation(e) => FailureKind::Validation(e),
            FetchError::Execution(e) => FailureKind::Execution(e),
            other => FailureKind::Fetch(other),
        };
        Self {
            job_id: job_id.clone(),
            stage: Stage::Fetch,
            kind,
        }
    }

    pub fn from_transcode(job_id: &JobId, err: TranscodeError) -> Self {
        let kind = match err {
            TranscodeError::Execution(e) => FailureKind::Execution(e),
            other => FailureKind::Transcode(other),
        };
        Self {
            job_id: job_id.clone(),
            stage: Stage::Transcode,
            kind,
        }
    }

    pub fn internal(job_id: &JobId, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.clone(),
            stage: Stage::Worker,
            kind: FailureKind::Internal(message.into()),
        }
    }

    /// Environment misconfiguration that an operator must fix.
    pub fn is_operator_alert(&self) -> bool {
        matches!(self.kind, FailureKind::Execution(_))
    }

    /// The fetch succeeded, so the raw artifact is still deliverable.
    pub fn is_degraded(&self) -> bool {
        self.stage == Stage::Transcode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> JobId {
        JobId::parse("j1").unwrap()
    }

    #[test]
    fn fetch_errors_keep_stage_and_id() {
        let e = JobError::from_fetch(&id(), FetchError::Timeout);
        assert_eq!(e.stage, Stage::Fetch);
        assert_eq!(e.kind, FailureKind::Fetch(FetchError::Timeout));
        assert_eq!(e.kind.name(), "fetch:timeout");
        assert_eq!(e.to_string(), "job j1 failed in fetch: extractor timed out");
        assert!(!e.is_degraded());
    }

    #[test]
    fn execution_errors_raise_alerts() {
        let exec = ExecutionError::NotFound {
            program: "ffmpeg".to_string(),
        };
        let e = JobError::from_transcode(&id(), TranscodeError::Execution(exec.clone()));
        assert_eq!(e.kind, FailureKind::Execution(exec));
        assert!(e.is_operator_alert());
        assert!(e.is_degraded());
    }

    #[test]
    fn validation_is_unwrapped_from_fetch() {
        let e = JobError::from_fetch(
            &id(),
            FetchError::Validation(ValidationError::HostDenied("localhost".to_string())),
        );
        assert!(matches!(e.kind, FailureKind::Validation(_)));
        assert_eq!(JobError::internal(&id(), "panic").kind.name(), "internal");
    }
}
