//! On-disk layout under the data directory.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Directories the updater owns.
///
/// ```text
/// <data>/
///   logs/
///   updater/
///     rollout.lock
///     skipped.json
///     downloads/
///     work/
/// ```
#[derive(Debug, Clone)]
pub struct UpdaterPaths {
    data: PathBuf,
    updater: PathBuf,
}

impl UpdaterPaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data = data_dir.into();
        let updater = data.join("updater");
        Self { data, updater }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data
    }

    pub fn updater_dir(&self) -> &Path {
        &self.updater
    }

    /// Downloaded patch targets.
    pub fn downloads_dir(&self) -> PathBuf {
        self.updater.join("downloads")
    }

    /// Staged copies and helper binaries.
    pub fn work_dir(&self) -> PathBuf {
        self.updater.join("work")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data.join("logs")
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("updater.log")
    }

    pub fn skip_list_file(&self) -> PathBuf {
        self.updater.join("skipped.json")
    }

    /// Held for the whole of a rollout; the work dir is shared.
    pub fn rollout_lock_file(&self) -> PathBuf {
        self.updater.join("rollout.lock")
    }

    /// Run-state lock files.
    pub fn run_state_dir(&self) -> PathBuf {
        self.updater.join("run")
    }

    /// A fresh staging directory path inside the work dir (not created).
    pub fn new_stage_dir(&self) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        self.work_dir()
            .join(format!("stage-{}-{}", std::process::id(), nanos))
    }
}
