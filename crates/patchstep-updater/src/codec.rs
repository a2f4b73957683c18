//! Patch codec boundary.
//!
//! The binary diff format is opaque to the updater. A codec takes a staged
//! directory tree and one verified patch file and mutates the tree in
//! place, or fails without the orchestrator caring how.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::{debug, warn};

/// Failure reported by a patch codec.
#[derive(Debug, Error)]
pub enum PatchError {
    /// The patch does not match the tree it was applied to
    #[error("patch does not apply to {}: {reason}", .dir.display())]
    Mismatch { dir: PathBuf, reason: String },

    /// The patch file itself is unreadable or corrupt
    #[error("corrupt patch {}: {reason}", .patch.display())]
    Corrupt { patch: PathBuf, reason: String },

    /// The codec program could not be started
    #[error("failed to run patch codec {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The codec ran but reported failure
    #[error("patch codec exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

/// Applies one patch to a directory tree.
///
/// Implementations are called from a blocking worker and must not assume
/// an async runtime.
pub trait PatchCodec: Send + Sync {
    /// Mutate `source_dir` in place using `patch_file`.
    fn apply(&self, source_dir: &Path, patch_file: &Path) -> Result<(), PatchError>;
}

/// Codec backed by an external program.
///
/// Invoked as `<program> <args..> <source_dir> <patch_file>`; a zero exit
/// status means the tree was patched.
#[derive(Debug, Clone)]
pub struct CommandPatchCodec {
    program: String,
    args: Vec<String>,
}

impl CommandPatchCodec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Build from a configured command line: first element is the program.
    ///
    /// Returns `None` for an empty command.
    pub fn from_command_line(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone()).with_args(args.iter().cloned()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl PatchCodec for CommandPatchCodec {
    fn apply(&self, source_dir: &Path, patch_file: &Path) -> Result<(), PatchError> {
        if !source_dir.is_dir() {
            return Err(PatchError::Mismatch {
                dir: source_dir.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }
        if !patch_file.is_file() {
            return Err(PatchError::Corrupt {
                patch: patch_file.to_path_buf(),
                reason: "patch file missing".to_string(),
            });
        }

        debug!(
            program = %self.program,
            dir = %source_dir.display(),
            patch = %patch_file.display(),
            "Running patch codec"
        );

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(source_dir)
            .arg(patch_file)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| PatchError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(
            program = %self.program,
            status = %output.status,
            stderr = %stderr,
            "Patch codec failed"
        );
        Err(PatchError::Failed {
            status: output.status.to_string(),
            stderr,
        })
    }
}
