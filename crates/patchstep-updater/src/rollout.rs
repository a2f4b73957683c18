//! Rollout orchestrator - executes an update plan against a live install.
//!
//! The pipeline runs strictly in order:
//!
//! ```text
//! Idle -> Cleaning -> Refreshing -> Resolving -> Staging
//!      -> (Downloading -> Applying)* -> AwaitingRunState? -> Replacing -> Done
//! ```
//!
//! with `Error` and `Cancelled` reachable from any non-terminal state. All
//! mutation happens on a staged copy under the work directory; the live
//! install is only touched by the single swap in `Replacing`. Nothing is
//! retried and nothing is rolled back: a failed rollout leaves its staged
//! copy behind for the next cleanup pass.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::codec::PatchCodec;
use crate::component::Component;
use crate::config::{ExecutionMode, RolloutConfig};
use crate::deferred::DeferredReplace;
use crate::distribution::{DistributionClient, TargetInfo};
use crate::error::UpdateError;
use crate::fsops;
use crate::lock::RolloutLock;
use crate::paths::UpdaterPaths;
use crate::plan::PlanResolver;
use crate::progress::{
    self, ProgressCallback, ProgressReport, ProgressShares, ResumeHandle, Signal, CLEAN_SHARE,
    COPY_SHARE, REFRESH_SHARE, REPLACE_SHARE, RESOLVE_SHARE,
};
use crate::runstate::RunStateSignal;
use crate::skip::SkipList;
use crate::version::Version;

/// Message reported when the plan is empty.
pub const ALREADY_UP_TO_DATE: &str = "Already up to date.";

/// Message reported on cancellation.
pub const UPDATE_CANCELLED: &str = "Update cancelled.";

/// Prefix of the message reported for unclassified failures.
pub const UNKNOWN_ERROR: &str = "Update failed with unknown error, please report this issue.";

/// Where a rollout currently is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RolloutState {
    #[default]
    Idle,
    Cleaning,
    Refreshing,
    Resolving,
    Staging,
    Downloading { step: usize, total: usize },
    Applying { step: usize, total: usize },
    AwaitingRunState,
    Replacing,
    Done,
    Error(String),
    Cancelled,
}

/// How a successful rollout ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutOutcome {
    /// Nothing to do; the plan was empty
    AlreadyCurrent,
    /// The target version was skipped by the user
    Skipped,
    /// The live install now holds the target version
    Replaced,
    /// The swap must run after this process exits; pass the action to
    /// `deferred::spawn_helper` just before exiting
    Deferred(DeferredReplace),
}

/// Executes update plans.
///
/// # Example
///
/// ```ignore
/// let orchestrator = Orchestrator::new(paths, distribution, codec, run_state)
///     .with_progress(Arc::new(|report| eprintln!("{report}")));
/// let outcome = orchestrator.run(&component, &target, cancel.token()).await?;
/// ```
pub struct Orchestrator {
    paths: UpdaterPaths,
    distribution: Arc<dyn DistributionClient>,
    codec: Arc<dyn PatchCodec>,
    run_state: Arc<dyn RunStateSignal>,
    mode: ExecutionMode,
    progress: ProgressCallback,
    skip_list: Option<SkipList>,
    deferred_delays: (Duration, Duration),
    state: RwLock<RolloutState>,
}

impl Orchestrator {
    pub fn new(
        paths: UpdaterPaths,
        distribution: Arc<dyn DistributionClient>,
        codec: Arc<dyn PatchCodec>,
        run_state: Arc<dyn RunStateSignal>,
    ) -> Self {
        let defaults = RolloutConfig::default();
        Self {
            paths,
            distribution,
            codec,
            run_state,
            mode: defaults.mode,
            progress: progress::silent(),
            skip_list: None,
            deferred_delays: (
                Duration::from_millis(defaults.deferred_first_delay_ms),
                Duration::from_millis(defaults.deferred_second_delay_ms),
            ),
            state: RwLock::new(RolloutState::Idle),
        }
    }

    /// Apply execution mode and deferred delays from configuration.
    pub fn with_config(mut self, config: &RolloutConfig) -> Self {
        self.mode = config.mode;
        self.deferred_delays = (
            Duration::from_millis(config.deferred_first_delay_ms),
            Duration::from_millis(config.deferred_second_delay_ms),
        );
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// Honour skipped versions during resolution.
    pub fn with_skip_list(mut self, skip_list: SkipList) -> Self {
        self.skip_list = Some(skip_list);
        self
    }

    pub fn with_deferred_delays(mut self, first: Duration, second: Duration) -> Self {
        self.deferred_delays = (first, second);
        self
    }

    pub fn paths(&self) -> &UpdaterPaths {
        &self.paths
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Get the current state of the orchestrator.
    pub fn state(&self) -> RolloutState {
        self.state
            .read()
            .map(|state| state.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn set_state(&self, state: RolloutState) {
        debug!(?state, "Rollout state");
        match self.state.write() {
            Ok(mut guard) => *guard = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }

    fn report(&self, report: ProgressReport) {
        (self.progress)(report);
    }

    /// Roll `component` forward (or back) to `target`.
    ///
    /// Every failure is also reported through the progress callback as an
    /// error-flagged message before being returned.
    ///
    /// # Errors
    ///
    /// - `RolloutInProgress` if any rollout over the same data directory is
    ///   in flight, in this process or another
    /// - `Cancelled` if `cancel` fired between steps
    /// - any error of the failing step; unclassified ones as `Unexpected`
    pub async fn run(
        &self,
        component: &Component,
        target: &Version,
        cancel: CancelToken,
    ) -> Result<RolloutOutcome, UpdateError> {
        self.run_in(self.mode, component, target, cancel).await
    }

    /// Drive a rollout to completion on a current-thread runtime.
    ///
    /// For batch use outside any async context. Steps always run inline,
    /// whatever the configured mode.
    pub fn run_blocking(
        &self,
        component: &Component,
        target: &Version,
        cancel: CancelToken,
    ) -> Result<RolloutOutcome, UpdateError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run_in(ExecutionMode::Inline, component, target, cancel))
    }

    async fn run_in(
        &self,
        mode: ExecutionMode,
        component: &Component,
        target: &Version,
        cancel: CancelToken,
    ) -> Result<RolloutOutcome, UpdateError> {
        let _lock = RolloutLock::acquire(&self.paths.rollout_lock_file(), component.name())?;

        info!(
            component = component.name(),
            installed = %component.installed_version(),
            to = %target,
            ?mode,
            "Starting rollout"
        );

        match self.execute(mode, component, target, &cancel).await {
            Ok(outcome) => {
                self.set_state(RolloutState::Done);
                info!(component = component.name(), ?outcome, "Rollout finished");
                Ok(outcome)
            }
            Err(UpdateError::Cancelled) => {
                self.set_state(RolloutState::Cancelled);
                warn!(component = component.name(), "Rollout cancelled");
                self.report(ProgressReport::error(UPDATE_CANCELLED));
                Err(UpdateError::Cancelled)
            }
            Err(e) if e.is_classified() => {
                self.set_state(RolloutState::Error(e.to_string()));
                error!(component = component.name(), error = %e, "Update failed");
                self.report(ProgressReport::error(format!("Update failed, error:\n{e}")));
                Err(e)
            }
            Err(e) => {
                self.set_state(RolloutState::Error(e.to_string()));
                error!(component = component.name(), error = ?e, "Unknown error during update");
                self.report(ProgressReport::error(format!("{UNKNOWN_ERROR}\n{e}")));
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        mode: ExecutionMode,
        component: &Component,
        target: &Version,
        cancel: &CancelToken,
    ) -> Result<RolloutOutcome, UpdateError> {
        let installed = component.installed_version();
        self.report(ProgressReport::message(format!(
            "Current version: {installed}\nTarget version: {target}"
        )));

        let mut percent: u8 = 0;
        self.report(ProgressReport::step(
            "Preparing to download and apply updates...",
            percent,
        ));

        cancel.check()?;
        self.set_state(RolloutState::Cleaning);
        let downloads = self.paths.downloads_dir();
        let work = self.paths.work_dir();
        {
            let (downloads, work) = (downloads.clone(), work.clone());
            blocking(mode, move || {
                fsops::clear_dir(&downloads)?;
                fsops::clear_dir(&work)
            })
            .await?;
        }
        percent += CLEAN_SHARE;

        cancel.check()?;
        self.set_state(RolloutState::Refreshing);
        self.report(ProgressReport::step("Refreshing patch information...", percent));
        self.distribution.refresh().await?;
        percent += REFRESH_SHARE;

        cancel.check()?;
        self.set_state(RolloutState::Resolving);
        self.report(ProgressReport::step(
            "Calculating which patches to apply...",
            percent,
        ));

        if self.is_skipped(component, target) {
            info!(component = component.name(), %target, "Target version skipped");
            self.report(ProgressReport::step(format!("Version {target} skipped."), 100));
            return Ok(RolloutOutcome::Skipped);
        }
        let plan = PlanResolver::new(component).resolve(installed, target)?;
        if plan.is_empty() {
            self.report(ProgressReport::step(ALREADY_UP_TO_DATE, 100));
            return Ok(RolloutOutcome::AlreadyCurrent);
        }

        info!(
            component = component.name(),
            from = %installed,
            to = %target,
            path = ?plan.target_names(),
            "Downloading and applying updates"
        );

        let mut targets: Vec<TargetInfo> = Vec::with_capacity(plan.len());
        for name in &plan {
            targets.push(self.distribution.resolve_target(name.as_str()).await?);
        }
        percent += RESOLVE_SHARE;
        let shares = ProgressShares::for_steps(plan.len());

        cancel.check()?;
        self.set_state(RolloutState::Staging);
        self.report(ProgressReport::step("Copying source files...", percent));
        let stage = self.paths.new_stage_dir();
        {
            let (live, stage) = (component.install_path().to_path_buf(), stage.clone());
            blocking(mode, move || fsops::copy_tree(&live, &stage).map(|_| ())).await?;
        }
        percent += COPY_SHARE;

        let total = targets.len();
        for (index, info) in targets.iter().enumerate() {
            let step = index + 1;

            cancel.check()?;
            self.set_state(RolloutState::Downloading { step, total });
            let message = format!("Downloading {} ({step} / {total})...", info.name);
            info!("{}", message);
            self.report(ProgressReport::step(message, percent));
            let patch_file = self.distribution.download(info, &downloads).await?;
            percent += shares.per_action;

            cancel.check()?;
            self.set_state(RolloutState::Applying { step, total });
            let message = format!("Applying {}...", info.name);
            info!("{}", message);
            self.report(ProgressReport::step(message, percent));
            self.apply(mode, &stage, patch_file, &info.name).await?;
            percent += shares.per_action;
        }

        let live = component.install_path().to_path_buf();
        let old = component.old_version_path();

        let outcome = if component.replace_requires_process_exit() {
            cancel.check()?;
            self.set_state(RolloutState::Replacing);
            let message = format!(
                "Registering action to replace {name} v{installed} with {name} v{target}...",
                name = component.name()
            );
            info!("{}", message);
            self.report(ProgressReport::step(message, percent));
            let (first, second) = self.deferred_delays;
            RolloutOutcome::Deferred(DeferredReplace::for_swap(&live, &old, &stage, first, second))
        } else {
            self.await_run_state(component, cancel).await?;

            cancel.check()?;
            self.set_state(RolloutState::Replacing);
            let message = format!(
                "Replacing {name} v{installed} with {name} v{target}...",
                name = component.name()
            );
            info!("{}", message);
            self.report(ProgressReport::step(message, percent));
            blocking(mode, move || fsops::swap_into_place(&live, &old, &stage)).await?;
            RolloutOutcome::Replaced
        };

        percent += REPLACE_SHARE + shares.extra;
        self.report(ProgressReport::step("Done.", percent));
        Ok(outcome)
    }

    fn is_skipped(&self, component: &Component, target: &Version) -> bool {
        let Some(skip_list) = &self.skip_list else {
            return false;
        };
        target > component.installed_version()
            && skip_list.is_skipped(component.name(), target.as_str())
    }

    async fn apply(
        &self,
        mode: ExecutionMode,
        stage: &Path,
        patch_file: PathBuf,
        target: &str,
    ) -> Result<(), UpdateError> {
        let codec = Arc::clone(&self.codec);
        let stage = stage.to_path_buf();
        let name = target.to_string();
        blocking(mode, move || {
            codec
                .apply(&stage, &patch_file)
                .map_err(|source| UpdateError::Patch { target: name, source })
        })
        .await
    }

    /// Make sure the live component is not running before the swap.
    ///
    /// Closing another process is user-visible, so the caller is asked
    /// first through `Signal::ComponentIsRunning`.
    async fn await_run_state(&self, component: &Component, cancel: &CancelToken) -> Result<(), UpdateError> {
        let name = component.name();
        if !self.run_state.is_running(name).await? {
            return Ok(());
        }

        self.set_state(RolloutState::AwaitingRunState);
        info!(component = name, "Component is running, waiting for permission to close it");

        let (resume, resumed) = ResumeHandle::new();
        self.report(ProgressReport::signal(Signal::ComponentIsRunning {
            component: name.to_string(),
            resume,
        }));

        tokio::select! {
            result = resumed => result.map_err(|_| UpdateError::Cancelled)?,
            _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
        }

        self.run_state.request_exit(name).await?;
        self.run_state.await_exit(name, cancel).await
    }
}

/// Run a blocking step according to `mode`.
async fn blocking<T, F>(mode: ExecutionMode, work: F) -> Result<T, UpdateError>
where
    F: FnOnce() -> Result<T, UpdateError> + Send + 'static,
    T: Send + 'static,
{
    match mode {
        ExecutionMode::Offload => tokio::task::spawn_blocking(work).await?,
        ExecutionMode::Inline => work(),
    }
}
