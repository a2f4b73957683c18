//! patchstep - command-line front end for the updater
//!
//! This crate provides:
//! - `update`: roll a component to the latest (or a given) version
//! - `check`: print the version an update would install, if any
//! - `skip`: stop offering a version
//! - `apply-deferred`: helper mode finishing a self-update after exit

pub mod cli;
pub mod logging;
pub mod update;

pub use cli::Cli;

use patchstep_updater::UpdateError;

/// Exit codes for CLI operations
///
/// - 0: Success - operation completed (including "already up to date")
/// - 1: General error - unspecified error occurred
/// - 2: Update failed - the rollout or its preparation failed
/// - 3: Cancelled - the user cancelled the rollout
/// - 4: Invalid input - bad arguments or configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Operation completed successfully (exit code 0)
    Success = 0,
    /// General error (exit code 1)
    GeneralError = 1,
    /// Update failed (exit code 2)
    UpdateFailed = 2,
    /// Update cancelled (exit code 3)
    Cancelled = 3,
    /// Invalid input provided (exit code 4)
    InvalidInput = 4,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    /// Convert to process exit code
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    /// Exit code for a failed update.
    pub fn for_error(err: &UpdateError) -> Self {
        match err {
            UpdateError::Cancelled => ExitCode::Cancelled,
            UpdateError::ConfigError(_) | UpdateError::InvalidVersion { .. } => {
                ExitCode::InvalidInput
            }
            _ => ExitCode::UpdateFailed,
        }
    }
}
