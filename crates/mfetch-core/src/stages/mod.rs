//! Pipeline stages: fetch (extractor) and transcode (encoder).
//!
//! Stages build discrete argument lists and run them through the shared
//! [`ProcessRunner`](crate::process::ProcessRunner); they never see the
//! scheduler. Every external run is bounded by a timeout and watches the job's
//! cancellation token.

mod encoder;
mod error;
mod extractor;
mod fetch;
mod transcode;

use tokio_util::sync::CancellationToken;

use crate::artifact::ScratchDir;
use crate::job::JobId;

pub use encoder::{EncodeProfile, EncoderCommand};
pub use error::{FetchError, TranscodeError, TranscodeFailure};
pub use extractor::{format_selector, ExtractorCommand, MediaInfo, CAPTION_LIMIT};
pub use fetch::{FetchOutput, Fetcher};
pub use transcode::Transcoder;

/// Per-job inputs every stage needs.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub scratch: ScratchDir,
    pub cancel: CancellationToken,
}

impl StageContext {
    pub fn new(scratch: ScratchDir, cancel: CancellationToken) -> Self {
        Self { scratch, cancel }
    }

    pub fn job_id(&self) -> &JobId {
        self.scratch.job_id()
    }
}
