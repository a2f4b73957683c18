//! Distribution clients: resolve named patch targets to verified bytes.
//!
//! A repository publishes a target listing next to the targets:
//!
//! ```text
//! <repository>/targets.json
//! <repository>/targets/<component>/v0_8_0.patch
//! ```
//!
//! with the listing shaped as
//! `{"targets": {"<name>": {"length": <bytes>, "sha256": "<hex>"}}}`.
//! A client must be refreshed before targets can be resolved; every
//! downloaded target is checked against the listing's size and digest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::artifact::{parse_sha256, ArtifactVerifier};
use crate::download::Downloader;
use crate::error::UpdateError;

/// Name of the listing document at the repository root.
pub const LISTING_FILE: &str = "targets.json";

/// Directory under the repository root holding the targets.
pub const TARGETS_DIR: &str = "targets";

/// Resolved metadata for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    pub name: String,
    pub length: u64,
    pub sha256: [u8; 32],
}

/// One listing entry as published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEntry {
    pub length: u64,
    pub sha256: String,
}

/// Published target listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetListing {
    #[serde(default)]
    pub targets: BTreeMap<String, TargetEntry>,
}

impl TargetListing {
    /// Look up and validate one entry.
    pub fn resolve(&self, name: &str) -> Result<TargetInfo, UpdateError> {
        let entry = self
            .targets
            .get(name)
            .ok_or_else(|| UpdateError::UnknownTarget(name.to_string()))?;
        let sha256 = parse_sha256(&entry.sha256)
            .ok_or_else(|| UpdateError::UnknownTarget(format!("{name}: malformed sha256")))?;
        Ok(TargetInfo {
            name: name.to_string(),
            length: entry.length,
            sha256,
        })
    }
}

/// Resolves, downloads and verifies named targets.
#[async_trait]
pub trait DistributionClient: Send + Sync {
    /// Refresh the trusted target listing.
    ///
    /// Failure is fatal to a rollout: without a fresh listing no target
    /// can be trusted.
    async fn refresh(&self) -> Result<(), UpdateError>;

    /// Resolve a target name against the refreshed listing.
    async fn resolve_target(&self, name: &str) -> Result<TargetInfo, UpdateError>;

    /// Download a resolved target into `dest_dir`, returning the verified
    /// file path.
    async fn download(&self, target: &TargetInfo, dest_dir: &Path) -> Result<PathBuf, UpdateError>;
}

/// Verify a fetched file against its listing entry.
///
/// Mismatches remove the file and surface as `UnknownTarget`.
fn verify_download(path: &Path, target: &TargetInfo) -> Result<(), UpdateError> {
    match ArtifactVerifier::new().verify(path, target) {
        Ok(()) => Ok(()),
        Err(e @ (UpdateError::HashMismatch { .. } | UpdateError::SizeMismatch { .. })) => {
            let _ = std::fs::remove_file(path);
            Err(UpdateError::UnknownTarget(format!(
                "{} failed verification: {e}",
                target.name
            )))
        }
        Err(e) => Err(e),
    }
}

async fn resolve_from(
    listing: &RwLock<Option<TargetListing>>,
    name: &str,
) -> Result<TargetInfo, UpdateError> {
    match listing.read().await.as_ref() {
        Some(listing) => listing.resolve(name),
        None => Err(UpdateError::UnknownTarget(format!(
            "{name}: target listing has not been refreshed"
        ))),
    }
}

/// Distribution client for an HTTP(S) repository.
pub struct HttpDistributionClient {
    repository: String,
    downloader: Downloader,
    listing: RwLock<Option<TargetListing>>,
}

impl HttpDistributionClient {
    pub fn new(repository: impl Into<String>, downloader: Downloader) -> Self {
        Self {
            repository: repository.into().trim_end_matches('/').to_string(),
            downloader,
            listing: RwLock::new(None),
        }
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    fn listing_url(&self) -> String {
        format!("{}/{}", self.repository, LISTING_FILE)
    }

    fn target_url(&self, name: &str) -> String {
        format!("{}/{}/{}", self.repository, TARGETS_DIR, name)
    }
}

#[async_trait]
impl DistributionClient for HttpDistributionClient {
    async fn refresh(&self) -> Result<(), UpdateError> {
        let url = self.listing_url();
        info!(url = %url, "Refreshing target listing");

        let data = self
            .downloader
            .fetch(&url)
            .await
            .map_err(|e| UpdateError::RefreshFailed(e.to_string()))?;
        let listing: TargetListing = serde_json::from_slice(&data)
            .map_err(|e| UpdateError::RefreshFailed(format!("{url}: {e}")))?;

        debug!(targets = listing.targets.len(), "Target listing refreshed");
        *self.listing.write().await = Some(listing);
        Ok(())
    }

    async fn resolve_target(&self, name: &str) -> Result<TargetInfo, UpdateError> {
        resolve_from(&self.listing, name).await
    }

    async fn download(&self, target: &TargetInfo, dest_dir: &Path) -> Result<PathBuf, UpdateError> {
        let dest = dest_dir.join(&target.name);
        let url = self.target_url(&target.name);
        match self
            .downloader
            .download_with_resume(&url, &dest, target.length)
            .await
        {
            Ok(()) => {}
            Err(e @ (UpdateError::DownloadFailed { .. } | UpdateError::SizeMismatch { .. })) => {
                warn!(url = %url, error = %e, "Target not served as listed");
                let _ = tokio::fs::remove_file(&dest).await;
                return Err(UpdateError::UnknownTarget(format!("{}: {e}", target.name)));
            }
            Err(e) => return Err(e),
        }
        verify_download(&dest, target)?;
        Ok(dest)
    }
}

/// Distribution client over a local mirror directory.
pub struct LocalDistributionClient {
    root: PathBuf,
    listing: RwLock<Option<TargetListing>>,
}

impl LocalDistributionClient {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            listing: RwLock::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl DistributionClient for LocalDistributionClient {
    async fn refresh(&self) -> Result<(), UpdateError> {
        let path = self.root.join(LISTING_FILE);
        info!(path = %path.display(), "Refreshing target listing");

        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| UpdateError::RefreshFailed(format!("{}: {e}", path.display())))?;
        let listing: TargetListing = serde_json::from_slice(&data)
            .map_err(|e| UpdateError::RefreshFailed(format!("{}: {e}", path.display())))?;

        debug!(targets = listing.targets.len(), "Target listing refreshed");
        *self.listing.write().await = Some(listing);
        Ok(())
    }

    async fn resolve_target(&self, name: &str) -> Result<TargetInfo, UpdateError> {
        resolve_from(&self.listing, name).await
    }

    async fn download(&self, target: &TargetInfo, dest_dir: &Path) -> Result<PathBuf, UpdateError> {
        let source = self.root.join(TARGETS_DIR).join(&target.name);
        let dest = dest_dir.join(&target.name);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if let Err(e) = tokio::fs::copy(&source, &dest).await {
            warn!(source = %source.display(), error = %e, "Target missing from mirror");
            return Err(UpdateError::UnknownTarget(format!("{}: {e}", target.name)));
        }

        verify_download(&dest, target)?;
        Ok(dest)
    }
}
