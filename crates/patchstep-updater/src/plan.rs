//! Patch-chain planning.
//!
//! Given a loaded component and two versions, compute the ordered list of
//! patch targets that turns an install of `from` into `to`. Any path
//! either stays inside one prerelease run, or lands on the release spine
//! (through a reversion patch when starting inside a run), walks the
//! spine, and optionally steps onto a prerelease run at its end.
//!
//! Target names:
//! - forward patch into `v`: `<component>/v<v with dots as underscores>.patch`
//! - reversion of prerelease `p` to its base release:
//!   `<component>/v<p encoded>.patch.rollback`

use std::fmt;

use tracing::debug;

use crate::component::{Component, VersionHistory};
use crate::error::UpdateError;
use crate::version::Version;

/// Suffix appended to a forward target name to name a reversion patch.
const REVERSION_SUFFIX: &str = ".rollback";

/// Opaque name of a downloadable patch artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatchTarget(String);

impl PatchTarget {
    /// Forward patch producing `version` from its predecessor.
    pub fn forward(component_name: &str, version: &Version) -> Self {
        Self(format!(
            "{}/v{}.patch",
            component_name.to_lowercase(),
            version.path_encoded()
        ))
    }

    /// Patch reverting `prerelease` to the release it branched from.
    pub fn reversion(component_name: &str, prerelease: &Version) -> Self {
        let mut target = Self::forward(component_name, prerelease);
        target.0.push_str(REVERSION_SUFFIX);
        target
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_reversion(&self) -> bool {
        self.0.ends_with(REVERSION_SUFFIX)
    }
}

impl fmt::Display for PatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PatchTarget {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Ordered patch targets; empty means "already current".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdatePlan {
    targets: Vec<PatchTarget>,
}

impl UpdatePlan {
    pub fn targets(&self) -> &[PatchTarget] {
        &self.targets
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PatchTarget> {
        self.targets.iter()
    }

    /// Target names as plain strings.
    pub fn target_names(&self) -> Vec<&str> {
        self.targets.iter().map(PatchTarget::as_str).collect()
    }
}

impl<'a> IntoIterator for &'a UpdatePlan {
    type Item = &'a PatchTarget;
    type IntoIter = std::slice::Iter<'a, PatchTarget>;

    fn into_iter(self) -> Self::IntoIter {
        self.targets.iter()
    }
}

/// Computes update plans over one component's history.
///
/// Resolution is pure: no I/O, and identical inputs always give an
/// identical plan.
pub struct PlanResolver<'a> {
    name: &'a str,
    history: &'a VersionHistory,
}

impl<'a> PlanResolver<'a> {
    pub fn new(component: &'a Component) -> Self {
        Self {
            name: component.name(),
            history: component.history(),
        }
    }

    /// Compute the patch chain from `from` to `to`.
    ///
    /// # Errors
    ///
    /// `UpdateError::InconsistentHistory` when the history offers no path
    /// between the two versions (a downgrade past the prerelease base, or
    /// a prerelease target that does not hang off the end of the spine).
    pub fn resolve(&self, from: &Version, to: &Version) -> Result<UpdatePlan, UpdateError> {
        let mut targets = Vec::new();

        if from == to {
            return Ok(UpdatePlan { targets });
        }

        // Same prerelease run: step forward one prerelease at a time.
        if from.is_prerelease() && to.is_prerelease() && from.core() == to.core() {
            self.walk_prereleases(from, to, &mut targets)?;
            return Ok(self.finish(from, to, targets));
        }

        let mut current = from.clone();

        if from.is_prerelease() {
            targets.push(PatchTarget::reversion(self.name, from));
            let base = self.history.previous_release(from).ok_or_else(|| {
                UpdateError::InconsistentHistory(format!(
                    "prerelease {from} has no release before it"
                ))
            })?;
            if base == to {
                return Ok(self.finish(from, to, targets));
            }
            current = base.clone();
        }

        while &current != to {
            match self.history.next_release(&current) {
                Some(next) => {
                    targets.push(PatchTarget::forward(self.name, next));
                    current = next.clone();
                }
                None => {
                    // End of the spine: the destination must be a prerelease
                    // run hanging off the last release reached.
                    if !to.is_prerelease() {
                        return Err(UpdateError::InconsistentHistory(format!(
                            "release {to} is not reachable from {from}"
                        )));
                    }
                    self.walk_prereleases(&current, to, &mut targets)?;
                    break;
                }
            }
        }

        Ok(self.finish(from, to, targets))
    }

    fn walk_prereleases(
        &self,
        from: &Version,
        to: &Version,
        targets: &mut Vec<PatchTarget>,
    ) -> Result<(), UpdateError> {
        let mut current = from;
        while current != to {
            current = self
                .history
                .next_sequential_prerelease(current)
                .ok_or_else(|| {
                    UpdateError::InconsistentHistory(format!(
                        "no sequential prerelease path from {from} to {to}"
                    ))
                })?;
            targets.push(PatchTarget::forward(self.name, current));
        }
        Ok(())
    }

    fn finish(&self, from: &Version, to: &Version, targets: Vec<PatchTarget>) -> UpdatePlan {
        debug!(
            component = self.name,
            %from,
            %to,
            steps = targets.len(),
            "Resolved update plan"
        );
        UpdatePlan { targets }
    }
}

/// Compute the patch chain for `component` from `from` to `to`.
pub fn resolve(component: &Component, from: &Version, to: &Version) -> Result<UpdatePlan, UpdateError> {
    PlanResolver::new(component).resolve(from, to)
}
