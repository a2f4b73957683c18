//! Remote version history documents.
//!
//! Each component publishes a JSON document listing every version in
//! publication order plus named "latest" pointers:
//!
//! ```json
//! {
//!   "versions": ["0.7.0", "0.7.0-rc.1", "0.7.0-rc.2", "0.8.0"],
//!   "latest": { "release": "0.8.0", "prerelease": "0.7.0-rc.2" }
//! }
//! ```
//!
//! Fetching is explicit: the caller owns the returned `VersionManifest`
//! and hands it to `ComponentDescriptor::load`, so repeated checks in a
//! long-running process never read a stale, implicitly cached history.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::download::Downloader;
use crate::error::UpdateError;
use crate::version::ReleaseType;

/// Parsed version history document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionManifest {
    /// Version strings in publication order
    pub versions: Vec<String>,
    /// Named pointers into `versions` (at minimum `release` and `prerelease`)
    #[serde(default)]
    pub latest: BTreeMap<String, String>,
}

impl VersionManifest {
    pub fn new(versions: Vec<String>, latest: BTreeMap<String, String>) -> Self {
        Self { versions, latest }
    }

    /// Parse a manifest fetched from `location`.
    pub fn from_slice(location: &str, data: &[u8]) -> Result<Self, UpdateError> {
        serde_json::from_slice(data).map_err(|e| UpdateError::ManifestUnavailable {
            location: location.to_string(),
            reason: e.to_string(),
        })
    }

    /// Version string a "latest" pointer names, if published.
    pub fn latest_pointer(&self, release_type: ReleaseType) -> Option<&str> {
        self.latest.get(release_type.manifest_key()).map(String::as_str)
    }
}

/// Fetches version histories from HTTP(S) URLs or local paths.
pub struct ManifestSource {
    downloader: Downloader,
}

impl ManifestSource {
    pub fn new(downloader: Downloader) -> Self {
        Self { downloader }
    }

    /// Fetch and parse the version history at `location`.
    ///
    /// `http://` and `https://` locations go through the downloader; any
    /// other value (optionally prefixed with `file://`) is read from disk.
    ///
    /// # Errors
    ///
    /// Every network, IO or parse failure is reported as
    /// `UpdateError::ManifestUnavailable`; the rollout cannot continue
    /// without a history.
    pub async fn fetch(&self, location: &str) -> Result<VersionManifest, UpdateError> {
        info!(location, "Fetching version history");

        let data = if location.starts_with("http://") || location.starts_with("https://") {
            self.downloader
                .fetch(location)
                .await
                .map_err(|e| unavailable(location, e))?
        } else {
            let path = location.strip_prefix("file://").unwrap_or(location);
            tokio::fs::read(Path::new(path))
                .await
                .map_err(|e| unavailable(location, e))?
        };

        let manifest = VersionManifest::from_slice(location, &data)?;
        debug!(
            location,
            versions = manifest.versions.len(),
            "Version history fetched"
        );
        Ok(manifest)
    }
}

fn unavailable(location: &str, err: impl std::fmt::Display) -> UpdateError {
    UpdateError::ManifestUnavailable {
        location: location.to_string(),
        reason: err.to_string(),
    }
}
