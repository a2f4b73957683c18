//! Components and their version histories.
//!
//! A component's history is a sequence of versions in publication order.
//! Releases form a spine; prereleases hang off the spine in contiguous
//! runs. The navigation queries here walk that sequence and return `None`
//! when there is nowhere to go.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::UpdateError;
use crate::manifest::VersionManifest;
use crate::version::{ReleaseType, Version};

/// Ordered versions of one component plus its "latest" pointers.
#[derive(Debug, Clone)]
pub struct VersionHistory {
    versions: Vec<Version>,
    latest_release: Option<Version>,
    latest_prerelease: Option<Version>,
    /// Index of the newest version named by any "latest" pointer
    last_announced: Option<usize>,
}

impl VersionHistory {
    /// Build the full (unclipped) history from a manifest.
    ///
    /// # Errors
    ///
    /// - `InvalidVersion` if any listed version fails to parse
    /// - `InvalidManifest` if a version is listed twice, there is no
    ///   "latest" pointer at all, or a pointer names an unlisted version
    pub fn from_manifest(manifest: &VersionManifest) -> Result<Self, UpdateError> {
        let versions = manifest
            .versions
            .iter()
            .enumerate()
            .map(|(index, raw)| Version::parse(raw, index))
            .collect::<Result<Vec<_>, _>>()?;

        for (i, version) in versions.iter().enumerate() {
            if versions[..i].contains(version) {
                return Err(UpdateError::InvalidManifest(format!(
                    "version {version} is listed more than once"
                )));
            }
        }

        if let Some(pair) = versions.windows(2).find(|pair| pair[0] >= pair[1]) {
            warn!(
                earlier = %pair[0],
                later = %pair[1],
                "Version history is not published in ascending order"
            );
        }

        if manifest.latest.is_empty() {
            return Err(UpdateError::InvalidManifest(
                "no latest versions".to_string(),
            ));
        }

        let find_pointer = |release_type: ReleaseType| -> Result<Option<Version>, UpdateError> {
            match manifest.latest_pointer(release_type) {
                None => Ok(None),
                Some(raw) => versions
                    .iter()
                    .find(|v| v.as_str() == raw)
                    .cloned()
                    .map(Some)
                    .ok_or_else(|| {
                        UpdateError::InvalidManifest(format!(
                            "latest {release_type} {raw} is not a listed version"
                        ))
                    }),
            }
        };

        let latest_release = find_pointer(ReleaseType::Release)?;
        let latest_prerelease = find_pointer(ReleaseType::Prerelease)?;

        let mut last_announced = None;
        for raw in manifest.latest.values() {
            let index = versions
                .iter()
                .find(|v| v.as_str() == raw)
                .map(Version::index)
                .ok_or_else(|| {
                    UpdateError::InvalidManifest(format!(
                        "latest pointer {raw} is not a listed version"
                    ))
                })?;
            last_announced = last_announced.max(Some(index));
        }

        Ok(Self {
            versions,
            latest_release,
            latest_prerelease,
            last_announced,
        })
    }

    /// Drop every version published after the newest "latest" pointer.
    ///
    /// Versions past the last announced pointer are not yet eligible for
    /// install; this protects against partially published histories.
    pub fn clip(&mut self) {
        if let Some(last_index) = self.last_announced {
            if last_index + 1 < self.versions.len() {
                debug!(
                    dropped = self.versions.len() - last_index - 1,
                    "Clipping unannounced versions from history"
                );
                self.versions.truncate(last_index + 1);
            }
        }
    }

    /// Look up a version by its exact string.
    pub fn find(&self, raw: &str) -> Option<&Version> {
        self.versions.iter().find(|v| v.as_str() == raw)
    }

    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// The newest version eligible for install.
    pub fn last(&self) -> Option<&Version> {
        self.versions.last()
    }

    /// Latest pointer of exactly this type, never substituting the other.
    pub fn latest_typed_version(&self, release_type: ReleaseType) -> Option<&Version> {
        match release_type {
            ReleaseType::Release => self.latest_release.as_ref(),
            ReleaseType::Prerelease => self.latest_prerelease.as_ref(),
        }
    }

    /// Latest version a user on `release_type` should run.
    ///
    /// A prerelease follower gets the latest release instead when it was
    /// published after the latest prerelease.
    pub fn latest_version(&self, release_type: ReleaseType) -> Option<&Version> {
        let release = self.latest_release.as_ref();
        let prerelease = self.latest_prerelease.as_ref();

        let release_newer = match (release, prerelease) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(r), Some(p)) => p.index() < r.index(),
        };

        match release_type {
            ReleaseType::Prerelease if !release_newer => prerelease,
            _ => release,
        }
    }

    /// First release published before `from`.
    pub fn previous_release(&self, from: &Version) -> Option<&Version> {
        let end = from.index().min(self.versions.len());
        self.versions[..end].iter().rev().find(|v| !v.is_prerelease())
    }

    /// First release published after `from`.
    pub fn next_release(&self, from: &Version) -> Option<&Version> {
        self.versions
            .get(from.index() + 1..)?
            .iter()
            .find(|v| !v.is_prerelease())
    }

    /// The version published immediately after `from`, if it is a prerelease.
    ///
    /// Prerelease patches are only ever built against their immediate
    /// predecessor, so prerelease runs are walked one step at a time.
    pub fn next_sequential_prerelease(&self, from: &Version) -> Option<&Version> {
        self.versions
            .get(from.index() + 1)
            .filter(|v| v.is_prerelease())
    }

    /// The version published immediately before `from`, if it is a prerelease.
    pub fn previous_sequential_prerelease(&self, from: &Version) -> Option<&Version> {
        let index = from.index().checked_sub(1)?;
        self.versions.get(index).filter(|v| v.is_prerelease())
    }
}

/// A component as configured, before its history has been loaded.
#[derive(Debug, Clone)]
pub struct ComponentDescriptor {
    /// Display name; lowercased for target names
    pub name: String,
    /// Live install directory
    pub install_path: PathBuf,
    /// Version string read from the running install
    pub installed_version: String,
    /// Whether the live directory belongs to the running updater itself
    pub replace_requires_process_exit: bool,
}

impl ComponentDescriptor {
    pub fn new(
        name: impl Into<String>,
        install_path: impl Into<PathBuf>,
        installed_version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            install_path: install_path.into(),
            installed_version: installed_version.into(),
            replace_requires_process_exit: false,
        }
    }

    pub fn with_replace_requires_process_exit(mut self, value: bool) -> Self {
        self.replace_requires_process_exit = value;
        self
    }

    /// Resolve the installed version against a fetched history.
    ///
    /// The installed version is looked up in the full published history,
    /// then the history is clipped to the newest "latest" pointer.
    ///
    /// # Errors
    ///
    /// `UnresolvedVersion` if the installed version was never published;
    /// this is fatal and not retried. Manifest structure errors are
    /// propagated from `VersionHistory::from_manifest`.
    pub fn load(self, manifest: &VersionManifest) -> Result<Component, UpdateError> {
        let mut history = VersionHistory::from_manifest(manifest)?;

        let installed = history
            .find(&self.installed_version)
            .cloned()
            .ok_or_else(|| UpdateError::UnresolvedVersion {
                component: self.name.clone(),
                version: self.installed_version.clone(),
            })?;

        history.clip();

        debug!(
            component = %self.name,
            installed = %installed,
            index = installed.index(),
            eligible = history.len(),
            "Component loaded"
        );

        Ok(Component {
            name: self.name,
            install_path: self.install_path,
            installed,
            history,
            replace_requires_process_exit: self.replace_requires_process_exit,
        })
    }
}

/// A loaded component: read-only for the remainder of a rollout.
#[derive(Debug, Clone)]
pub struct Component {
    name: String,
    install_path: PathBuf,
    installed: Version,
    history: VersionHistory,
    replace_requires_process_exit: bool,
}

impl Component {
    /// Shorthand for `descriptor.load(manifest)`.
    pub fn load(
        descriptor: ComponentDescriptor,
        manifest: &VersionManifest,
    ) -> Result<Self, UpdateError> {
        descriptor.load(manifest)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn install_path(&self) -> &Path {
        &self.install_path
    }

    pub fn installed_version(&self) -> &Version {
        &self.installed
    }

    pub fn history(&self) -> &VersionHistory {
        &self.history
    }

    pub fn replace_requires_process_exit(&self) -> bool {
        self.replace_requires_process_exit
    }

    /// Installed version is newer than anything eligible (a development build).
    pub fn is_undeployed(&self) -> bool {
        self.history
            .last()
            .map_or(true, |last| &self.installed > last)
    }

    pub fn latest_version(&self, release_type: ReleaseType) -> Option<&Version> {
        self.history.latest_version(release_type)
    }

    /// Look up an eligible version by its exact string.
    pub fn find_version(&self, raw: &str) -> Option<&Version> {
        self.history.find(raw)
    }

    /// Sibling directory the live install is moved to during replacement,
    /// e.g. `labbie 0.7.0`.
    pub fn old_version_path(&self) -> PathBuf {
        let dir_name = format!("{} {}", self.name.to_lowercase(), self.installed);
        self.install_path.with_file_name(dir_name)
    }
}
