//! Update availability check.

use tracing::debug;

use crate::component::Component;
use crate::skip::SkipList;
use crate::version::{ReleaseType, Version};

/// Version the user should be offered, if any.
///
/// - The latest version for `release_type` when it is newer than the
///   installed one and has not been skipped.
/// - The latest release when a prerelease is installed and the latest
///   version is a release. This offer cannot be skipped; it moves a user
///   who left the prerelease channel back onto releases.
pub fn check_for_update<'a>(
    component: &'a Component,
    release_type: ReleaseType,
    skip_list: &SkipList,
) -> Option<&'a Version> {
    let latest = component.latest_version(release_type)?;
    let installed = component.installed_version();

    if latest > installed && !skip_list.is_skipped(component.name(), latest.as_str()) {
        debug!(component = component.name(), %installed, %latest, "Update available");
        return Some(latest);
    }

    if !latest.is_prerelease() && installed.is_prerelease() {
        debug!(component = component.name(), %installed, %latest, "Prerelease installed, offering release");
        return Some(latest);
    }

    None
}

/// Whether offering `target` should allow skipping it.
///
/// Returning from a prerelease to an older release is not skippable.
pub fn can_skip(component: &Component, target: &Version) -> bool {
    target > component.installed_version()
}
