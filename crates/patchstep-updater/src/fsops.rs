//! Directory tree operations used by the rollout.
//!
//! All functions here are blocking and are run on a worker when the
//! orchestrator offloads.

use std::io;
use std::path::Path;

use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::error::UpdateError;

/// Remove everything inside `dir`, keeping `dir` itself.
///
/// A missing directory is created and counts as already empty.
pub fn clear_dir(dir: &Path) -> Result<(), UpdateError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        return Ok(());
    }

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let removed = if path.is_dir() && !path.is_symlink() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match removed {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    debug!(dir = %dir.display(), "Directory cleared");
    Ok(())
}

/// Recursively copy `source` into a new directory `dest`.
///
/// Symlinks are recreated rather than followed on Unix.
pub fn copy_tree(source: &Path, dest: &Path) -> Result<u64, UpdateError> {
    if !source.is_dir() {
        return Err(UpdateError::IoError(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", source.display()),
        )));
    }

    let mut files = 0u64;
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| UpdateError::IoError(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| UpdateError::Unexpected(e.into()))?;
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
            files += 1;
        } else {
            std::fs::copy(entry.path(), &target)?;
            files += 1;
        }
    }

    debug!(
        source = %source.display(),
        dest = %dest.display(),
        files,
        "Tree copied"
    );
    Ok(files)
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<(), UpdateError> {
    let pointee = std::fs::read_link(link)?;
    std::os::unix::fs::symlink(pointee, target)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> Result<(), UpdateError> {
    std::fs::copy(link, target)?;
    Ok(())
}

/// Remove a file or directory tree at `path` if present.
pub fn remove_path(path: &Path) -> Result<(), UpdateError> {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => Err(e),
    };
    result.map_err(Into::into)
}

/// Move a directory, falling back to copy + delete when a plain rename is
/// impossible (e.g. across filesystems).
pub fn move_dir(from: &Path, to: &Path) -> Result<(), UpdateError> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if from.is_dir() && !to.exists() => {
            debug!(
                from = %from.display(),
                to = %to.display(),
                error = %e,
                "Rename failed, copying instead"
            );
            if let Err(copy_err) = copy_tree(from, to) {
                let _ = std::fs::remove_dir_all(to);
                return Err(copy_err);
            }
            std::fs::remove_dir_all(from)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Swap a staged tree into the live location.
///
/// 1. Remove a stale `old` left by an earlier update
/// 2. Move `live` to `old`
/// 3. Move `staged` to `live`
///
/// If step 3 fails the live tree is moved back.
pub fn swap_into_place(live: &Path, old: &Path, staged: &Path) -> Result<(), UpdateError> {
    info!(
        live = %live.display(),
        old = %old.display(),
        "Replacing live install with staged copy"
    );

    remove_path(old).map_err(|e| {
        UpdateError::ReplaceFailed(format!("failed to remove stale {}: {e}", old.display()))
    })?;

    let had_live = live.exists();
    if had_live {
        move_dir(live, old).map_err(|e| {
            UpdateError::ReplaceFailed(format!("failed to move {} aside: {e}", live.display()))
        })?;
    }

    if let Err(e) = move_dir(staged, live) {
        warn!("Failed to move staged copy into place, restoring original");
        let mut message = format!("failed to move staged copy to {}: {e}", live.display());
        if had_live {
            if let Err(restore) = move_dir(old, live) {
                error!(
                    old = %old.display(),
                    live = %live.display(),
                    error = %restore,
                    "Failed to restore original install"
                );
                message.push_str(&restore_failure(old, &restore));
            }
        }
        return Err(UpdateError::ReplaceFailed(message));
    }

    Ok(())
}

fn restore_failure(old: &Path, restore: &UpdateError) -> String {
    format!(
        "; restoring the original also failed ({restore}), it remains at {}",
        old.display()
    )
}
