//! Deferred replacement of the updater's own install.
//!
//! A running executable cannot move its own directory away on every
//! platform, so the swap is written down as a `DeferredReplace` and carried
//! out by a detached helper process after the updater exits. Each step
//! waits until its offset from the helper's start, so the live directory
//! has been vacated before the staged copy takes its place.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::UpdateError;
use crate::fsops;

/// Subcommand the helper executable runs to apply a deferred action.
pub const APPLY_DEFERRED_COMMAND: &str = "apply-deferred";

/// Attempts per rename while the source is still held by the exiting process.
const RENAME_ATTEMPTS: u32 = 20;

const RENAME_RETRY_DELAY: Duration = Duration::from_millis(250);

/// One delayed move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredRename {
    pub from: PathBuf,
    pub to: PathBuf,
    /// Offset from helper start at which the move happens
    pub delay_ms: u64,
}

/// Ordered list of delayed moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredReplace {
    pub steps: Vec<DeferredRename>,
}

impl DeferredReplace {
    /// The two-step swap: `live` to `old`, then `staged` to `live`.
    pub fn for_swap(
        live: &Path,
        old: &Path,
        staged: &Path,
        first_delay: Duration,
        second_delay: Duration,
    ) -> Self {
        Self {
            steps: vec![
                DeferredRename {
                    from: live.to_path_buf(),
                    to: old.to_path_buf(),
                    delay_ms: first_delay.as_millis() as u64,
                },
                DeferredRename {
                    from: staged.to_path_buf(),
                    to: live.to_path_buf(),
                    delay_ms: second_delay.as_millis() as u64,
                },
            ],
        }
    }

    pub fn load(path: &Path) -> Result<Self, UpdateError> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), UpdateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Perform every step in order, blocking the calling thread.
    pub fn execute(&self) -> Result<(), UpdateError> {
        let started = Instant::now();

        for step in &self.steps {
            let due = Duration::from_millis(step.delay_ms);
            if let Some(remaining) = due.checked_sub(started.elapsed()) {
                std::thread::sleep(remaining);
            }

            info!(
                from = %step.from.display(),
                to = %step.to.display(),
                "Applying deferred move"
            );
            fsops::remove_path(&step.to)?;
            rename_with_retry(&step.from, &step.to)?;
        }
        Ok(())
    }
}

fn rename_with_retry(from: &Path, to: &Path) -> Result<(), UpdateError> {
    let mut attempt = 1;
    loop {
        match fsops::move_dir(from, to) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < RENAME_ATTEMPTS && from.exists() => {
                debug!(attempt, error = %e, "Source still busy, retrying move");
                attempt += 1;
                std::thread::sleep(RENAME_RETRY_DELAY);
            }
            Err(e) => {
                return Err(UpdateError::ReplaceFailed(format!(
                    "failed to move {} to {}: {e}",
                    from.display(),
                    to.display()
                )))
            }
        }
    }
}

/// Hand a deferred action to a detached helper process.
///
/// The current executable is copied into `work_dir` first, since its own
/// directory may be the one about to move. The helper is started as
/// `<copy> apply-deferred --action <file>` and left running.
pub fn spawn_helper(action: &DeferredReplace, work_dir: &Path) -> Result<PathBuf, UpdateError> {
    std::fs::create_dir_all(work_dir)?;

    let action_file = work_dir.join(format!("deferred-{}.json", std::process::id()));
    action.save(&action_file)?;

    let current = std::env::current_exe()?;
    let helper = work_dir.join(format!(
        "update-helper{}",
        std::env::consts::EXE_SUFFIX
    ));
    std::fs::copy(&current, &helper)?;

    let child = Command::new(&helper)
        .arg(APPLY_DEFERRED_COMMAND)
        .arg("--action")
        .arg(&action_file)
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| {
            warn!(helper = %helper.display(), error = %e, "Failed to start update helper");
            UpdateError::ReplaceFailed(format!("failed to start update helper: {e}"))
        })?;

    info!(pid = child.id(), action = %action_file.display(), "Update helper started");
    Ok(action_file)
}
