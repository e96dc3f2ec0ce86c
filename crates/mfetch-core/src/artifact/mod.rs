//! Job-private scratch directories and the artifacts they hold.
//!
//! Every job gets `<scratch_root>/run-<instance>/<job_id>/`, created
//! exclusively, so no two jobs ever write into the same directory and artifact
//! I/O needs no locking. The store is the only place that charges and releases
//! scratch bytes.

mod instance;
mod store;

use std::path::{Path, PathBuf};

use crate::job::JobId;

pub use instance::{sweep_abandoned, InstanceDir};
pub use store::ArtifactStore;

/// Scratch directory owned by one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchDir {
    job_id: JobId,
    path: PathBuf,
}

impl ScratchDir {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

/// A file produced by a stage, exclusively owned by the job that produced it.
///
/// Not `Clone`: ownership moves from stage to job, and releasing it goes
/// through [`ArtifactStore::discard`] or [`ArtifactStore::cleanup`].
#[derive(Debug, PartialEq, Eq)]
pub struct Artifact {
    path: PathBuf,
    size: u64,
    owner: JobId,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn owner(&self) -> &JobId {
        &self.owner
    }

    pub fn info(&self) -> ArtifactInfo {
        ArtifactInfo {
            path: self.path.clone(),
            size: self.size,
        }
    }
}

/// Read-only view of an artifact for snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("scratch I/O on {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("scratch full: need {needed} bytes, {in_use} of {limit} in use")]
    ScratchFull { needed: u64, in_use: u64, limit: u64 },
    #[error("scratch directory already exists: {0}")]
    AlreadyExists(PathBuf),
    #[error("unknown job {0}")]
    UnknownJob(String),
    #[error("job {0} has nothing to deliver")]
    NotDeliverable(String),
    #[error("path {0} is outside the job scratch directory")]
    OutsideScratch(PathBuf),
}

impl StoreError {
    pub(crate) fn io(path: &Path, err: &std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}
