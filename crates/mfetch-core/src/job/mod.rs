//! Job model: identifiers, requests, the status state machine, the mutable
//! job record, and the job-level error taxonomy.

mod error;
mod model;
mod record;
mod state;

pub use error::{FailureKind, JobError, Stage};
pub use model::{JobId, JobRequest, OutputFormat, VideoQuality};
pub use record::{Job, JobSnapshot};
pub use state::{InvalidTransition, JobEvent, JobStatus};
