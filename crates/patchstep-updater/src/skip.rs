//! Versions the user chose to skip, per component.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::UpdateError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SkipFile {
    #[serde(default)]
    skipped: BTreeMap<String, BTreeSet<String>>,
}

/// Persisted set of skipped versions.
///
/// Stored as JSON: `{"skipped": {"labbie": ["0.8.0"]}}`. Component names
/// are compared case-insensitively.
#[derive(Debug, Clone)]
pub struct SkipList {
    path: PathBuf,
    data: SkipFile,
}

impl SkipList {
    /// Load the list at `path`; a missing or unreadable file is an empty list.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt skip list");
                SkipFile::default()
            }),
            Err(_) => {
                debug!(path = %path.display(), "No skip list, starting empty");
                SkipFile::default()
            }
        };
        Self { path, data }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_skipped(&self, component: &str, version: &str) -> bool {
        self.data
            .skipped
            .get(&component.to_lowercase())
            .is_some_and(|versions| versions.contains(version))
    }

    /// Record `version` as skipped and persist.
    pub fn skip(&mut self, component: &str, version: &str) -> Result<(), UpdateError> {
        info!(component, version, "Skipping version");
        self.data
            .skipped
            .entry(component.to_lowercase())
            .or_default()
            .insert(version.to_string());
        self.save()
    }

    /// Forget every skipped version of `component` and persist.
    pub fn clear(&mut self, component: &str) -> Result<(), UpdateError> {
        self.data.skipped.remove(&component.to_lowercase());
        self.save()
    }

    fn save(&self) -> Result<(), UpdateError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(&self.data)?)?;
        Ok(())
    }
}
