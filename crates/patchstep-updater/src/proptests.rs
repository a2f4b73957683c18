//! Property-based tests for patchstep-updater.
//!
//! # Properties Tested
//!
//! - Equal endpoints always resolve to an empty plan
//! - Resolution is deterministic
//! - Release-chain plans: optional reversion first, then one forward patch
//!   per release on the spine up to the target
//! - Plans into the trailing prerelease run walk it one step at a time
//! - Version ordering matches the `(major, minor, patch, kind, number)` key

#![cfg(test)]

use std::collections::BTreeMap;

use proptest::prelude::*;
use proptest::sample::Index;

use crate::component::{Component, ComponentDescriptor};
use crate::manifest::VersionManifest;
use crate::plan::{resolve, PatchTarget};
use crate::version::Version;

// =============================================================================
// Generators
// =============================================================================

/// A history shaped like real publishing: each release is preceded by a run
/// of release candidates, and the history may end in a run of betas for the
/// next version.
fn arb_history() -> impl Strategy<Value = Vec<String>> {
    (prop::collection::vec(0usize..3, 1..6), 0usize..3).prop_map(|(runs, trailing)| {
        let mut versions = vec!["0.0.0".to_string()];
        for (i, run) in runs.iter().enumerate() {
            let minor = i + 1;
            for n in 1..=*run {
                versions.push(format!("0.{minor}.0-rc.{n}"));
            }
            versions.push(format!("0.{minor}.0"));
        }
        let minor = runs.len() + 1;
        for n in 1..=trailing {
            versions.push(format!("0.{minor}.0-beta.{n}"));
        }
        versions
    })
}

fn load(versions: &[String]) -> Component {
    let mut latest = BTreeMap::new();
    if let Some(release) = versions.iter().rev().find(|v| !v.contains('-')) {
        latest.insert("release".to_string(), release.clone());
    }
    if let Some(last) = versions.last().filter(|v| v.contains('-')) {
        latest.insert("prerelease".to_string(), last.clone());
    }
    let manifest = VersionManifest::new(versions.to_vec(), latest);
    ComponentDescriptor::new("Labbie", "/opt/labbie", versions[0].clone())
        .load(&manifest)
        .unwrap()
}

fn forward(version: &Version) -> PatchTarget {
    PatchTarget::forward("Labbie", version)
}

const KINDS: [&str; 3] = ["alpha", "beta", "rc"];

fn arb_version_parts() -> impl Strategy<Value = (u64, u64, u64, Option<(usize, u64)>)> {
    (
        0u64..4,
        0u64..4,
        0u64..4,
        prop::option::of((0usize..3, 0u64..4)),
    )
}

fn render((major, minor, patch, pre): (u64, u64, u64, Option<(usize, u64)>)) -> String {
    match pre {
        Some((kind, n)) => format!("{major}.{minor}.{patch}-{}.{n}", KINDS[kind]),
        None => format!("{major}.{minor}.{patch}"),
    }
}

fn sort_key((major, minor, patch, pre): (u64, u64, u64, Option<(usize, u64)>)) -> (u64, u64, u64, usize, u64) {
    match pre {
        Some((kind, n)) => (major, minor, patch, kind, n),
        None => (major, minor, patch, usize::MAX, 0),
    }
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_equal_endpoints_give_empty_plan(history in arb_history(), pick in any::<Index>()) {
        let component = load(&history);
        let versions = component.history().versions();
        let v = pick.get(versions);
        prop_assert!(resolve(&component, v, v).unwrap().is_empty());
    }

    #[test]
    fn prop_release_chain_shape(
        history in arb_history(),
        from_pick in any::<Index>(),
        to_pick in any::<Index>(),
    ) {
        let component = load(&history);
        let versions = component.history().versions();
        let from = from_pick.get(versions);

        let start = if from.is_prerelease() {
            component.history().previous_release(from).unwrap()
        } else {
            from
        };
        let reachable: Vec<&Version> = versions
            .iter()
            .filter(|v| !v.is_prerelease() && v.index() >= start.index())
            .collect();
        let to = *to_pick.get(&reachable);
        prop_assume!(from != to);

        let plan = resolve(&component, from, to).unwrap();
        prop_assert_eq!(&plan, &resolve(&component, from, to).unwrap());

        let mut expected = Vec::new();
        if from.is_prerelease() {
            expected.push(PatchTarget::reversion("Labbie", from));
        }
        expected.extend(
            versions
                .iter()
                .filter(|v| !v.is_prerelease() && v.index() > start.index() && v.index() <= to.index())
                .map(forward),
        );
        prop_assert_eq!(plan.targets(), expected.as_slice());
        prop_assert!(plan.targets().iter().skip(1).all(|t| !t.is_reversion()));
    }

    #[test]
    fn prop_trailing_prerelease_run(
        history in arb_history(),
        from_pick in any::<Index>(),
        to_pick in any::<Index>(),
    ) {
        let component = load(&history);
        let versions = component.history().versions();
        let last_release = versions.iter().rposition(|v| !v.is_prerelease()).unwrap();
        let trailing = &versions[last_release + 1..];
        prop_assume!(!trailing.is_empty());

        let releases: Vec<&Version> = versions.iter().filter(|v| !v.is_prerelease()).collect();
        let from = *from_pick.get(&releases);
        let to = to_pick.get(trailing);

        let plan = resolve(&component, from, to).unwrap();
        let expected: Vec<PatchTarget> = versions
            .iter()
            .filter(|v| v.index() > from.index() && v.index() <= to.index())
            .filter(|v| !v.is_prerelease() || v.index() > last_release)
            .map(forward)
            .collect();
        prop_assert_eq!(plan.targets(), expected.as_slice());
    }

    #[test]
    fn prop_ordering_matches_key(a in arb_version_parts(), b in arb_version_parts()) {
        let va = Version::parse(&render(a), 0).unwrap();
        let vb = Version::parse(&render(b), 1).unwrap();
        prop_assert_eq!(va.cmp(&vb), sort_key(a).cmp(&sort_key(b)));
        prop_assert_eq!(va == vb, render(a) == render(b));
    }
}
