//! Exclusive rollout lock.
//!
//! Every rollout sharing a data directory stages under the same work dir,
//! and `Cleaning` empties it. Only one rollout may hold the lock at a time,
//! across orchestrators and across processes.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::UpdateError;

/// An advisory lock on `<updater>/rollout.lock`, released on drop.
#[derive(Debug)]
pub struct RolloutLock {
    file: File,
    path: PathBuf,
}

impl RolloutLock {
    /// Take the lock without waiting.
    ///
    /// # Errors
    ///
    /// `RolloutInProgress` naming `component` when another holder exists;
    /// `IoError` if the lock file cannot be opened.
    pub fn acquire(path: &Path, component: &str) -> Result<Self, UpdateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(lock = %path.display(), component, "Rollout lock taken");
                Ok(Self {
                    file,
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(UpdateError::RolloutInProgress(component.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RolloutLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
