//! Error types for the update system.

use thiserror::Error;

use crate::codec::PatchError;

/// Errors that can occur while loading a component or rolling out an update.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The installed version string does not appear in the published history
    #[error("installed version {version} of {component} is not in the published version history")]
    UnresolvedVersion { component: String, version: String },

    /// Version history could not be fetched or parsed
    #[error("version history unavailable from {location}: {reason}")]
    ManifestUnavailable { location: String, reason: String },

    /// Version history parsed but is structurally unusable
    #[error("invalid version history: {0}")]
    InvalidManifest(String),

    /// A version string is not `major.minor.patch[-(alpha|beta|rc).N]`
    #[error("invalid version {version:?}: {reason}")]
    InvalidVersion { version: String, reason: String },

    /// The history does not contain a patch path between two versions
    #[error("inconsistent version history: {0}")]
    InconsistentHistory(String),

    /// Distribution client could not refresh its target listing
    #[error("failed to refresh target listing: {0}")]
    RefreshFailed(String),

    /// Distribution client could not resolve or verify a named target
    #[error("unknown target: {0}")]
    UnknownTarget(String),

    /// Patch codec rejected a patch against the staged tree
    #[error("error while applying patch {target}: {source}")]
    Patch {
        target: String,
        #[source]
        source: PatchError,
    },

    /// Rollout was cancelled by the caller
    #[error("update cancelled")]
    Cancelled,

    /// Another rollout over the same data directory is in flight
    #[error("a rollout for {0} is already in progress")]
    RolloutInProgress(String),

    /// Run-state negotiation with the live component failed
    #[error("run-state error: {0}")]
    RunState(String),

    /// The live install could not be swapped with the staged copy
    #[error("replacement failed: {0}")]
    ReplaceFailed(String),

    /// Target hash does not match the listing
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    /// Target size does not match the listing
    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Download failed with HTTP status
    #[error("download failed with status {status}")]
    DownloadFailed { status: u16 },

    /// Network error during download
    #[error("network error: {0}")]
    NetworkError(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Anything not covered above; reported as an unknown error
    #[error("{0:#}")]
    Unexpected(anyhow::Error),
}

impl UpdateError {
    /// Whether this error belongs to the known taxonomy.
    ///
    /// Unclassified failures get a bug-report message instead of a plain
    /// "update failed".
    pub fn is_classified(&self) -> bool {
        !matches!(self, UpdateError::Unexpected(_))
    }
}

impl From<reqwest::Error> for UpdateError {
    fn from(err: reqwest::Error) -> Self {
        UpdateError::HttpError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for UpdateError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            UpdateError::Cancelled
        } else {
            UpdateError::Unexpected(anyhow::anyhow!("worker task panicked: {err}"))
        }
    }
}

impl From<toml::de::Error> for UpdateError {
    fn from(err: toml::de::Error) -> Self {
        UpdateError::ConfigError(err.to_string())
    }
}
