//! Stage-local error types.

use crate::artifact::{Artifact, StoreError};
use crate::policy::ValidationError;
use crate::process::{ExecutionError, ToolFailure};
use crate::retry::{FailureClass, Retryable};

/// Why a fetch did not produce an artifact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("extractor timed out")]
    Timeout,
    #[error("media not found: {0}")]
    NotFound(String),
    #[error("media is geo-blocked: {0}")]
    GeoBlocked(String),
    #[error("login required: {0}")]
    LoginRequired(String),
    #[error("media exceeds size limit of {limit} bytes")]
    SizeExceeded { limit: u64, reported: Option<u64> },
    #[error("transient network failure: {0}")]
    Transient(String),
    #[error("network blocked: {0}")]
    NetworkBlocked(String),
    #[error("extractor produced no output file")]
    EmptyOutput,
    #[error("unreadable media metadata: {0}")]
    Metadata(String),
    #[error(transparent)]
    Tool(ToolFailure),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Builds the error for a classified extractor failure.
    pub fn from_class(class: FailureClass, failure: ToolFailure, limit: u64) -> Self {
        let detail = failure.stderr_tail.clone();
        match class {
            FailureClass::NotFound => FetchError::NotFound(detail),
            FailureClass::GeoBlocked => FetchError::GeoBlocked(detail),
            FailureClass::LoginRequired => FetchError::LoginRequired(detail),
            FailureClass::SizeExceeded => FetchError::SizeExceeded {
                limit,
                reported: None,
            },
            FailureClass::Transient => FetchError::Transient(detail),
            FailureClass::NetworkBlocked => FetchError::NetworkBlocked(detail),
            FailureClass::Other => FetchError::Tool(failure),
        }
    }

    /// Short stable name used in logs and by the CLI.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Validation(_) => "validation",
            FetchError::Timeout => "timeout",
            FetchError::NotFound(_) => "not_found",
            FetchError::GeoBlocked(_) => "geo_blocked",
            FetchError::LoginRequired(_) => "login_required",
            FetchError::SizeExceeded { .. } => "size_exceeded",
            FetchError::Transient(_) => "transient",
            FetchError::NetworkBlocked(_) => "network_blocked",
            FetchError::EmptyOutput => "empty_output",
            FetchError::Metadata(_) => "metadata",
            FetchError::Tool(_) => "tool",
            FetchError::Execution(_) => "execution",
            FetchError::Storage(_) => "storage",
            FetchError::Cancelled => "cancelled",
        }
    }
}

impl Retryable for FetchError {
    fn class(&self) -> FailureClass {
        match self {
            FetchError::Transient(_) => FailureClass::Transient,
            FetchError::LoginRequired(_) => FailureClass::LoginRequired,
            FetchError::NotFound(_) => FailureClass::NotFound,
            FetchError::GeoBlocked(_) => FailureClass::GeoBlocked,
            FetchError::SizeExceeded { .. } => FailureClass::SizeExceeded,
            FetchError::NetworkBlocked(_) => FailureClass::NetworkBlocked,
            _ => FailureClass::Other,
        }
    }

    fn cancelled() -> Self {
        FetchError::Cancelled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscodeError {
    #[error("encoder timed out")]
    Timeout,
    #[error(transparent)]
    Tool(ToolFailure),
    #[error("encoder produced no output file")]
    EmptyOutput,
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("transcode cancelled")]
    Cancelled,
}

impl TranscodeError {
    pub fn kind(&self) -> &'static str {
        match self {
            TranscodeError::Timeout => "timeout",
            TranscodeError::Tool(_) => "tool",
            TranscodeError::EmptyOutput => "empty_output",
            TranscodeError::Execution(_) => "execution",
            TranscodeError::Storage(_) => "storage",
            TranscodeError::Cancelled => "cancelled",
        }
    }
}

/// A failed transcode hands the untouched raw artifact back to the caller.
#[derive(Debug)]
pub struct TranscodeFailure {
    pub raw: Artifact,
    pub error: TranscodeError,
}
