//! Published versions and their ordering.
//!
//! A version string is `major.minor.patch` optionally followed by a
//! prerelease tag `-<kind>.<number>` where kind is one of `alpha`, `beta`
//! or `rc`. Ordering follows the 5-tuple
//! `(major, minor, patch, kind rank, number)` with the absence of a tag
//! ranking above every tag of the same core, so `0.8.0 > 0.8.0-rc.3`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

/// Rank given to a version without a prerelease tag.
const RELEASE_RANK: u8 = u8::MAX;

/// Kind of prerelease tag, ordered `alpha < beta < rc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrereleaseKind {
    Alpha,
    Beta,
    Rc,
}

impl PrereleaseKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "alpha" => Some(Self::Alpha),
            "beta" => Some(Self::Beta),
            "rc" => Some(Self::Rc),
            _ => None,
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Alpha => 0,
            Self::Beta => 1,
            Self::Rc => 2,
        }
    }

    /// Tag prefix as it appears in a version string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alpha => "alpha",
            Self::Beta => "beta",
            Self::Rc => "rc",
        }
    }
}

/// Which "latest" pointer of a history a caller follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseType {
    /// Releases only
    #[default]
    Release,
    /// Releases and prereleases, whichever is newer
    Prerelease,
}

impl ReleaseType {
    /// Key of the matching pointer in the remote manifest's `latest` map.
    pub fn manifest_key(&self) -> &'static str {
        match self {
            Self::Release => "release",
            Self::Prerelease => "prerelease",
        }
    }
}

impl fmt::Display for ReleaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.manifest_key())
    }
}

/// One published version of a component.
///
/// Two versions are equal iff their raw strings are equal. `index` is the
/// position of publication in the component's history and does not take
/// part in comparisons.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    index: usize,
    key: (u64, u64, u64, u8, u64),
    prerelease: Option<(PrereleaseKind, u64)>,
}

impl Version {
    /// Parse a version string published at `index`.
    ///
    /// # Errors
    ///
    /// Returns `UpdateError::InvalidVersion` when the core is not valid
    /// semver or the prerelease tag is not `(alpha|beta|rc).N`.
    pub fn parse(raw: &str, index: usize) -> Result<Self, UpdateError> {
        let invalid = |reason: String| UpdateError::InvalidVersion {
            version: raw.to_string(),
            reason,
        };

        let parsed = semver::Version::parse(raw).map_err(|e| invalid(e.to_string()))?;

        let prerelease = if parsed.pre.is_empty() {
            None
        } else {
            let mut parts = parsed.pre.as_str().split('.');
            let kind = parts
                .next()
                .and_then(PrereleaseKind::parse)
                .ok_or_else(|| invalid(format!("unknown prerelease type in {:?}", parsed.pre.as_str())))?;
            let number = parts
                .next()
                .ok_or_else(|| invalid("missing prerelease number".to_string()))?
                .parse::<u64>()
                .map_err(|e| invalid(format!("bad prerelease number: {e}")))?;
            if parts.next().is_some() {
                return Err(invalid("trailing prerelease identifiers".to_string()));
            }
            Some((kind, number))
        };

        let (rank, number) = match prerelease {
            Some((kind, number)) => (kind.rank(), number),
            None => (RELEASE_RANK, 0),
        };

        Ok(Self {
            raw: raw.to_string(),
            index,
            key: (parsed.major, parsed.minor, parsed.patch, rank, number),
            prerelease,
        })
    }

    /// The version string exactly as published.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Position of this version in the published history.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    /// Prerelease kind and number, if tagged.
    pub fn prerelease(&self) -> Option<(PrereleaseKind, u64)> {
        self.prerelease
    }

    /// The `major.minor.patch` prefix.
    pub fn core(&self) -> &str {
        self.raw
            .split(['-', '+'])
            .next()
            .unwrap_or(self.raw.as_str())
    }

    /// Version string with dots replaced by underscores, as used in target names.
    pub fn path_encoded(&self) -> String {
        self.raw.replace('.', "_")
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        // Raw string breaks ties (e.g. build metadata) to keep the order total.
        self.key
            .cmp(&other.key)
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
