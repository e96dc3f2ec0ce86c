//! Core of the media fetch pipeline: a bounded worker pool that fetches media
//! with an external extractor, optionally transcodes it with an external
//! encoder, and hands the result to the caller for delivery.

pub mod artifact;
pub mod config;
pub mod job;
pub mod logging;
pub mod policy;
pub mod process;
pub mod retry;
pub mod scheduler;
pub mod stages;

pub use artifact::{Artifact, ArtifactInfo, ArtifactStore, StoreError};
pub use config::PipelineConfig;
pub use job::{JobError, JobId, JobRequest, JobSnapshot, JobStatus, OutputFormat};
pub use process::{ProcessRunner, SystemRunner};
pub use scheduler::{JobHandle, PoolStats, Scheduler, SubmitError};
