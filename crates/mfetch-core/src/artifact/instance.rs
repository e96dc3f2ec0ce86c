//! Per-process scratch namespaces.
//!
//! A scheduler works under `<scratch_root>/run-<uuid>/` and holds an exclusive
//! lock on the `.lock` file inside it for as long as it lives. The lock goes
//! away with the process, so a namespace whose lock can be taken is abandoned.
//! Directories under the root without a lock file are never touched.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use super::StoreError;

const NAMESPACE_PREFIX: &str = "run-";
pub const LOCK_FILE: &str = ".lock";

/// This process's namespace under the scratch root. Dropping it releases the lock.
#[derive(Debug)]
pub struct InstanceDir {
    path: PathBuf,
    _lock: File,
}

impl InstanceDir {
    /// Creates a fresh namespace under `root` and locks it.
    pub fn claim(root: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root).map_err(|e| StoreError::io(root, &e))?;
        let name = format!("{}{}", NAMESPACE_PREFIX, uuid::Uuid::new_v4().simple());
        let path = root.join(name);
        std::fs::create_dir(&path).map_err(|e| StoreError::io(&path, &e))?;

        let lock_path = path.join(LOCK_FILE);
        let mut lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)
            .map_err(|e| StoreError::io(&lock_path, &e))?;
        lock.try_lock_exclusive()
            .map_err(|e| StoreError::io(&lock_path, &e))?;
        // Owner pid, for operators looking at the scratch root.
        if let Err(e) = writeln!(lock, "{}", std::process::id()) {
            debug!(path = %lock_path.display(), "could not record pid: {}", e);
        }
        debug!(path = %path.display(), "scratch namespace claimed");
        Ok(Self { path, _lock: lock })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// True when `dir` carries a lock file that no live process holds.
fn is_abandoned(dir: &Path) -> bool {
    let lock_path = dir.join(LOCK_FILE);
    let file = match OpenOptions::new().read(true).write(true).open(&lock_path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return false,
        Err(e) => {
            debug!(path = %lock_path.display(), "lock file unreadable: {}", e);
            return false;
        }
    };
    // Released again when `file` drops.
    file.try_lock_exclusive().is_ok()
}

/// Removes namespaces under `root` whose owner has exited and whose mtime is
/// at least `older_than` ago. Returns the number removed.
pub async fn sweep_abandoned(root: &Path, older_than: Duration) -> Result<usize, StoreError> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(StoreError::io(root, &e)),
    };
    let now = SystemTime::now();
    let mut removed = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => return Err(StoreError::io(root, &e)),
        };
        if !entry.file_name().to_string_lossy().starts_with(NAMESPACE_PREFIX) {
            continue;
        }
        let meta = match entry.metadata().await {
            Ok(m) if m.is_dir() => m,
            _ => continue,
        };
        let age = meta
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();
        let path = entry.path();
        if age < older_than || !is_abandoned(&path) {
            continue;
        }
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                info!(path = %path.display(), age_secs = age.as_secs(), "removed abandoned scratch namespace");
                removed += 1;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), "could not remove abandoned scratch: {}", e),
        }
    }
    Ok(removed)
}
