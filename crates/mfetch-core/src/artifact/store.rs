use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use super::{Artifact, ArtifactInfo, ScratchDir, StoreError};
use crate::job::JobId;

/// Owns the scratch root and the global scratch-byte budget.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    max_bytes: u64,
    charged: Mutex<HashMap<JobId, u64>>,
}

impl ArtifactStore {
    /// Opens (creating if needed) the scratch root.
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, &e))?;
        Ok(Self {
            root,
            max_bytes,
            charged: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Bytes currently charged across all jobs.
    pub fn bytes_in_use(&self) -> u64 {
        self.charged.lock().values().sum()
    }

    /// Creates the job's private directory. Fails if it already exists.
    pub async fn create_scratch(&self, job_id: &JobId) -> Result<ScratchDir, StoreError> {
        let path = self.root.join(job_id.as_str());
        match tokio::fs::create_dir(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(path))
            }
            Err(e) => return Err(StoreError::io(&path, &e)),
        }
        debug!(job_id = %job_id, path = %path.display(), "scratch created");
        Ok(ScratchDir {
            job_id: job_id.clone(),
            path,
        })
    }

    /// Fails with `ScratchFull` when no bytes are left to start new work.
    pub fn ensure_headroom(&self) -> Result<(), StoreError> {
        let in_use = self.bytes_in_use();
        if in_use >= self.max_bytes {
            return Err(StoreError::ScratchFull {
                needed: 1,
                in_use,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    /// Takes ownership of a file a stage produced in `scratch` and charges its size.
    pub async fn adopt(&self, scratch: &ScratchDir, path: PathBuf) -> Result<Artifact, StoreError> {
        if !path.starts_with(&scratch.path) {
            return Err(StoreError::OutsideScratch(path));
        }
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| StoreError::io(&path, &e))?;
        let size = meta.len();
        {
            let mut charged = self.charged.lock();
            let in_use: u64 = charged.values().sum();
            if in_use.saturating_add(size) > self.max_bytes {
                return Err(StoreError::ScratchFull {
                    needed: size,
                    in_use,
                    limit: self.max_bytes,
                });
            }
            *charged.entry(scratch.job_id.clone()).or_insert(0) += size;
        }
        Ok(Artifact {
            path,
            size,
            owner: scratch.job_id.clone(),
        })
    }

    /// Deletes one artifact and releases its bytes.
    pub async fn discard(&self, artifact: Artifact) -> Result<(), StoreError> {
        match tokio::fs::remove_file(&artifact.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&artifact.path, &e)),
        }
        self.release(&artifact.owner, artifact.size);
        debug!(job_id = %artifact.owner, path = %artifact.path.display(), "artifact discarded");
        Ok(())
    }

    /// Opens an artifact for delivery. Only paths under the scratch root are served.
    pub async fn open_for_read(&self, artifact: &ArtifactInfo) -> Result<tokio::fs::File, StoreError> {
        if !artifact.path.starts_with(&self.root) {
            return Err(StoreError::OutsideScratch(artifact.path.clone()));
        }
        tokio::fs::File::open(&artifact.path)
            .await
            .map_err(|e| StoreError::io(&artifact.path, &e))
    }

    /// Removes the job's whole scratch directory and releases its bytes.
    /// Returns `false` when there was nothing left to remove.
    pub async fn cleanup(&self, job_id: &JobId) -> Result<bool, StoreError> {
        let path = self.root.join(job_id.as_str());
        self.charged.lock().remove(job_id);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                debug!(job_id = %job_id, "scratch removed");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, &e)),
        }
    }

    /// Removes scratch directories not owned by a live job whose mtime is at
    /// least `older_than` ago. Returns the number removed.
    pub async fn sweep(&self, live: &HashSet<JobId>, older_than: Duration) -> Result<usize, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::io(&self.root, &e))?;
        let now = SystemTime::now();
        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Err(StoreError::io(&self.root, &e)),
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            let owner = JobId::parse(&name).ok();
            if owner.as_ref().is_some_and(|id| live.contains(id)) {
                continue;
            }
            let path = entry.path();
            let meta = match entry.metadata().await {
                Ok(m) if m.is_dir() => m,
                _ => continue,
            };
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age < older_than {
                continue;
            }
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    if let Some(id) = owner {
                        self.charged.lock().remove(&id);
                    }
                    info!(path = %path.display(), age_secs = age.as_secs(), "removed orphaned scratch");
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), "could not remove orphaned scratch: {}", e),
            }
        }
        Ok(removed)
    }

    fn release(&self, job_id: &JobId, size: u64) {
        let mut charged = self.charged.lock();
        if let Some(bytes) = charged.get_mut(job_id) {
            *bytes = bytes.saturating_sub(size);
            if *bytes == 0 {
                charged.remove(job_id);
            }
        }
    }
}
