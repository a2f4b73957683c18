//! # patchstep-updater
//!
//! Incremental self-update engine.
//!
//! This crate handles:
//! - Version histories with a release spine and prerelease runs
//! - Patch-chain planning between any two published versions
//! - Target download with resume support and SHA-256 verification
//! - Staged patch application and atomic replacement of the live install
//! - Run-state negotiation with a running component
//! - Deferred self-replacement through a detached helper process
//!
//! ## Safety of the live install
//!
//! Patches are only ever applied to a staged copy. The live directory is
//! touched exactly once, by the final swap, and only after every patch in
//! the plan has applied cleanly.

pub mod artifact;
pub mod cancel;
pub mod check;
pub mod codec;
pub mod component;
pub mod config;
pub mod deferred;
pub mod distribution;
pub mod download;
pub mod error;
pub mod fsops;
pub mod lock;
pub mod manifest;
pub mod paths;
pub mod plan;
pub mod progress;
#[cfg(test)]
mod proptests;
pub mod rollout;
pub mod runstate;
pub mod skip;
pub mod version;

// Re-export main types for convenience
pub use artifact::ArtifactVerifier;
pub use cancel::{CancelHandle, CancelToken};
pub use check::{can_skip, check_for_update};
pub use codec::{CommandPatchCodec, PatchCodec, PatchError};
pub use component::{Component, ComponentDescriptor, VersionHistory};
pub use config::{
    ComponentConfig, ExecutionMode, LoggingConfig, NetworkConfig, PathsConfig, RolloutConfig,
    UpdaterConfig,
};
pub use deferred::{spawn_helper, DeferredRename, DeferredReplace, APPLY_DEFERRED_COMMAND};
pub use distribution::{
    DistributionClient, HttpDistributionClient, LocalDistributionClient, TargetEntry, TargetInfo,
    TargetListing,
};
pub use download::Downloader;
pub use error::UpdateError;
pub use lock::RolloutLock;
pub use manifest::{ManifestSource, VersionManifest};
pub use paths::UpdaterPaths;
pub use plan::{resolve, PatchTarget, PlanResolver, UpdatePlan};
pub use progress::{ProgressCallback, ProgressReport, ResumeHandle, Signal};
pub use rollout::{Orchestrator, RolloutOutcome, RolloutState};
pub use runstate::{LockFileRunState, RunStateSignal, RunningInstance};
pub use skip::SkipList;
pub use version::{PrereleaseKind, ReleaseType, Version};
