//! End-to-end rollout tests against a local mirror, a scripted codec and
//! lock-file run state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};
use tempfile::TempDir;

use patchstep_updater::progress::ProgressCallback;
use patchstep_updater::rollout::{ALREADY_UP_TO_DATE, UPDATE_CANCELLED};
use patchstep_updater::{
    CancelHandle, CancelToken, Component, ComponentDescriptor, ExecutionMode,
    LocalDistributionClient, LockFileRunState, Orchestrator, PatchCodec, PatchError,
    ProgressReport, RolloutOutcome, RolloutState, RunningInstance, Signal, SkipList, TargetEntry,
    TargetListing, UpdateError, UpdaterPaths, VersionManifest,
};

const HISTORY: [&str; 4] = ["0.7.0", "0.7.0-rc.1", "0.7.0-rc.2", "0.8.0"];

/// Codec driven by a tiny script: `require <file> <content>` checks the
/// staged tree, `set <file> <content>` writes to it.
struct ScriptCodec;

impl PatchCodec for ScriptCodec {
    fn apply(&self, source_dir: &Path, patch_file: &Path) -> Result<(), PatchError> {
        let script = std::fs::read_to_string(patch_file).map_err(|e| PatchError::Corrupt {
            patch: patch_file.to_path_buf(),
            reason: e.to_string(),
        })?;
        for line in script.lines() {
            let mut parts = line.splitn(3, ' ');
            let (op, file, content) = (parts.next(), parts.next(), parts.next());
            match (op, file, content) {
                (Some("require"), Some(file), Some(content)) => {
                    let actual = std::fs::read_to_string(source_dir.join(file)).unwrap_or_default();
                    if actual != content {
                        return Err(PatchError::Mismatch {
                            dir: source_dir.to_path_buf(),
                            reason: format!("{file} is {actual:?}, expected {content:?}"),
                        });
                    }
                }
                (Some("set"), Some(file), Some(content)) => {
                    std::fs::write(source_dir.join(file), content).map_err(|e| {
                        PatchError::Mismatch {
                            dir: source_dir.to_path_buf(),
                            reason: e.to_string(),
                        }
                    })?;
                }
                _ => {
                    return Err(PatchError::Corrupt {
                        patch: patch_file.to_path_buf(),
                        reason: format!("bad line {line:?}"),
                    })
                }
            }
        }
        Ok(())
    }
}

struct Fixture {
    _temp: TempDir,
    paths: UpdaterPaths,
    live: PathBuf,
    mirror: PathBuf,
    run_dir: PathBuf,
    reports: Arc<Mutex<Vec<ProgressReport>>>,
}

impl Fixture {
    fn new(installed: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let live = temp.path().join("apps").join("labbie");
        std::fs::create_dir_all(live.join("lib")).unwrap();
        std::fs::write(live.join("version.txt"), installed).unwrap();
        std::fs::write(live.join("lib").join("core.dat"), "core").unwrap();

        let mirror = temp.path().join("mirror");
        std::fs::create_dir_all(&mirror).unwrap();

        Self {
            paths: UpdaterPaths::new(temp.path().join("data")),
            run_dir: temp.path().join("run"),
            live,
            mirror,
            reports: Arc::new(Mutex::new(Vec::new())),
            _temp: temp,
        }
    }

    fn publish(&self, targets: &[(&str, String)]) {
        let mut listing = TargetListing::default();
        for (name, content) in targets {
            let path = self.mirror.join("targets").join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, content).unwrap();
            listing.targets.insert(
                name.to_string(),
                TargetEntry {
                    length: content.len() as u64,
                    sha256: hex::encode(Sha256::digest(content.as_bytes())),
                },
            );
        }
        std::fs::write(
            self.mirror.join("targets.json"),
            serde_json::to_vec(&listing).unwrap(),
        )
        .unwrap();
    }

    fn component(&self, installed: &str, self_update: bool) -> Component {
        let mut latest = BTreeMap::new();
        latest.insert("release".to_string(), "0.8.0".to_string());
        latest.insert("prerelease".to_string(), "0.7.0-rc.2".to_string());
        let manifest = VersionManifest::new(HISTORY.iter().map(|s| s.to_string()).collect(), latest);
        ComponentDescriptor::new("Labbie", &self.live, installed)
            .with_replace_requires_process_exit(self_update)
            .load(&manifest)
            .unwrap()
    }

    fn progress(&self) -> ProgressCallback {
        let reports = Arc::clone(&self.reports);
        Arc::new(move |report| reports.lock().unwrap().push(report))
    }

    fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with_codec(Arc::new(ScriptCodec))
    }

    fn orchestrator_with_codec(&self, codec: Arc<dyn PatchCodec>) -> Orchestrator {
        Orchestrator::new(
            self.paths.clone(),
            Arc::new(LocalDistributionClient::new(&self.mirror)),
            codec,
            Arc::new(
                LockFileRunState::new(&self.run_dir).with_poll_interval(Duration::from_millis(5)),
            ),
        )
        .with_progress(self.progress())
        .with_deferred_delays(Duration::from_millis(5), Duration::from_millis(10))
    }

    fn messages(&self) -> Vec<(Option<String>, Option<u8>, bool)> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.message.clone(), r.percent, r.error))
            .collect()
    }

    fn live_snapshot(&self) -> Vec<(PathBuf, Vec<u8>, SystemTime)> {
        let mut files = Vec::new();
        for name in ["version.txt", "lib/core.dat"] {
            let path = self.live.join(name);
            let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
            files.push((path.clone(), std::fs::read(&path).unwrap(), modified));
        }
        files
    }
}

fn standard_targets() -> Vec<(&'static str, String)> {
    vec![
        (
            "labbie/v0_7_0-rc_1.patch.rollback",
            "require version.txt 0.7.0-rc.1\nset version.txt 0.7.0".to_string(),
        ),
        (
            "labbie/v0_8_0.patch",
            "require version.txt 0.7.0\nset version.txt 0.8.0".to_string(),
        ),
    ]
}

#[tokio::test]
async fn test_prerelease_rolls_back_then_forward() {
    let fixture = Fixture::new("0.7.0-rc.1");
    fixture.publish(&standard_targets());
    let component = fixture.component("0.7.0-rc.1", false);
    let target = component.find_version("0.8.0").unwrap().clone();

    let orchestrator = fixture.orchestrator();
    let outcome = orchestrator
        .run(&component, &target, CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome, RolloutOutcome::Replaced);
    assert_eq!(orchestrator.state(), RolloutState::Done);
    assert_eq!(std::fs::read_to_string(fixture.live.join("version.txt")).unwrap(), "0.8.0");
    assert_eq!(std::fs::read_to_string(fixture.live.join("lib/core.dat")).unwrap(), "core");

    let old = component.old_version_path();
    assert!(old.ends_with("labbie 0.7.0-rc.1"));
    assert_eq!(std::fs::read_to_string(old.join("version.txt")).unwrap(), "0.7.0-rc.1");

    let messages = fixture.messages();
    let (last_message, last_percent, last_error) = messages.last().unwrap().clone();
    assert_eq!(last_message.as_deref(), Some("Done."));
    assert_eq!(last_percent, Some(100));
    assert!(!last_error);

    let percents: Vec<u8> = messages.iter().filter_map(|(_, p, _)| *p).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_already_current_touches_nothing() {
    let fixture = Fixture::new("0.8.0");
    fixture.publish(&standard_targets());
    let component = fixture.component("0.8.0", false);
    let target = component.installed_version().clone();
    let before = fixture.live_snapshot();

    let orchestrator = fixture.orchestrator();
    let outcome = orchestrator
        .run(&component, &target, CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome, RolloutOutcome::AlreadyCurrent);
    assert_eq!(fixture.live_snapshot(), before);
    assert!(!component.old_version_path().exists());
    assert_eq!(std::fs::read_dir(fixture.paths.work_dir()).unwrap().count(), 0);

    let (message, percent, error) = fixture.messages().last().unwrap().clone();
    assert_eq!(message.as_deref(), Some(ALREADY_UP_TO_DATE));
    assert_eq!(percent, Some(100));
    assert!(!error);
}

#[tokio::test]
async fn test_unknown_target_leaves_live_unmodified() {
    let fixture = Fixture::new("0.7.0-rc.1");
    // Only the reversion is published; the forward patch is missing.
    fixture.publish(&standard_targets()[..1]);
    let component = fixture.component("0.7.0-rc.1", false);
    let target = component.find_version("0.8.0").unwrap().clone();
    let before = fixture.live_snapshot();

    let orchestrator = fixture.orchestrator();
    let result = orchestrator.run(&component, &target, CancelToken::never()).await;

    assert!(matches!(result, Err(UpdateError::UnknownTarget(_))));
    assert!(matches!(orchestrator.state(), RolloutState::Error(_)));
    assert_eq!(fixture.live_snapshot(), before);
    assert!(!component.old_version_path().exists());

    let (message, _, error) = fixture.messages().last().unwrap().clone();
    assert!(error);
    assert!(message.unwrap().starts_with("Update failed, error:\n"));
}

#[tokio::test]
async fn test_patch_error_discards_stage() {
    let fixture = Fixture::new("0.7.0-rc.1");
    fixture.publish(&[
        (
            "labbie/v0_7_0-rc_1.patch.rollback",
            "require version.txt 0.6.9\nset version.txt 0.7.0".to_string(),
        ),
        ("labbie/v0_8_0.patch", "set version.txt 0.8.0".to_string()),
    ]);
    let component = fixture.component("0.7.0-rc.1", false);
    let target = component.find_version("0.8.0").unwrap().clone();
    let before = fixture.live_snapshot();

    let result = fixture
        .orchestrator()
        .run(&component, &target, CancelToken::never())
        .await;

    match result {
        Err(UpdateError::Patch { target, .. }) => {
            assert_eq!(target, "labbie/v0_7_0-rc_1.patch.rollback")
        }
        other => panic!("expected patch error, got {other:?}"),
    }
    assert_eq!(fixture.live_snapshot(), before);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let fixture = Fixture::new("0.7.0-rc.1");
    fixture.publish(&standard_targets());
    let component = fixture.component("0.7.0-rc.1", false);
    let target = component.find_version("0.8.0").unwrap().clone();
    let before = fixture.live_snapshot();

    let handle = CancelHandle::new();
    handle.cancel();
    let orchestrator = fixture.orchestrator();
    let result = orchestrator.run(&component, &target, handle.token()).await;

    assert!(matches!(result, Err(UpdateError::Cancelled)));
    assert_eq!(orchestrator.state(), RolloutState::Cancelled);
    assert_eq!(fixture.live_snapshot(), before);
    let (message, _, error) = fixture.messages().last().unwrap().clone();
    assert_eq!(message.as_deref(), Some(UPDATE_CANCELLED));
    assert!(error);
}

/// Applies through `ScriptCodec`, then cancels the rollout.
struct CancellingCodec {
    cancel: CancelHandle,
}

impl PatchCodec for CancellingCodec {
    fn apply(&self, source_dir: &Path, patch_file: &Path) -> Result<(), PatchError> {
        ScriptCodec.apply(source_dir, patch_file)?;
        self.cancel.cancel();
        Ok(())
    }
}

#[tokio::test]
async fn test_cancelled_between_patches() {
    let fixture = Fixture::new("0.7.0-rc.1");
    fixture.publish(&standard_targets());
    let component = fixture.component("0.7.0-rc.1", false);
    let target = component.find_version("0.8.0").unwrap().clone();
    let before = fixture.live_snapshot();

    let handle = CancelHandle::new();
    let orchestrator = fixture.orchestrator_with_codec(Arc::new(CancellingCodec {
        cancel: handle.clone(),
    }));
    let result = orchestrator.run(&component, &target, handle.token()).await;

    assert!(matches!(result, Err(UpdateError::Cancelled)));
    assert_eq!(orchestrator.state(), RolloutState::Cancelled);

    let downloads = fixture.paths.downloads_dir();
    assert!(downloads.join("labbie/v0_7_0-rc_1.patch.rollback").exists());
    assert!(!downloads.join("labbie/v0_8_0.patch").exists());
    assert!(!fixture
        .messages()
        .iter()
        .any(|(message, _, _)| message.as_deref().is_some_and(|m| m.contains("v0_8_0.patch"))));

    let (message, _, error) = fixture.messages().last().unwrap().clone();
    assert_eq!(message.as_deref(), Some(UPDATE_CANCELLED));
    assert!(error);

    assert_eq!(fixture.live_snapshot(), before);
    assert_eq!(stage_dirs(&fixture.paths), 1);
}

#[tokio::test]
async fn test_skipped_target_short_circuits() {
    let fixture = Fixture::new("0.7.0");
    fixture.publish(&standard_targets());
    let component = fixture.component("0.7.0", false);
    let target = component.find_version("0.8.0").unwrap().clone();

    let mut skips = SkipList::load(fixture.paths.skip_list_file());
    skips.skip("Labbie", "0.8.0").unwrap();

    let outcome = fixture
        .orchestrator()
        .with_skip_list(skips)
        .run(&component, &target, CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome, RolloutOutcome::Skipped);
    assert_eq!(std::fs::read_to_string(fixture.live.join("version.txt")).unwrap(), "0.7.0");
}

#[tokio::test]
async fn test_running_component_is_asked_to_exit() {
    let fixture = Fixture::new("0.7.0-rc.1");
    fixture.publish(&standard_targets());
    let component = fixture.component("0.7.0-rc.1", false);
    let target = component.find_version("0.8.0").unwrap().clone();

    let instance = RunningInstance::register(&fixture.run_dir, "Labbie").unwrap();
    let app = tokio::spawn(async move {
        while !instance.exit_requested() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        instance.acknowledge_exit().unwrap();
    });

    let asked = Arc::new(Mutex::new(Vec::new()));
    let progress: ProgressCallback = {
        let asked = Arc::clone(&asked);
        Arc::new(move |report: ProgressReport| {
            if let Some(Signal::ComponentIsRunning { component, resume }) = report.signal {
                asked.lock().unwrap().push(component);
                resume.resume();
            }
        })
    };

    let outcome = fixture
        .orchestrator()
        .with_progress(progress)
        .run(&component, &target, CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome, RolloutOutcome::Replaced);
    assert_eq!(asked.lock().unwrap().as_slice(), ["Labbie".to_string()]);
    app.await.unwrap();
}

#[tokio::test]
async fn test_declined_close_cancels() {
    let fixture = Fixture::new("0.7.0-rc.1");
    fixture.publish(&standard_targets());
    let component = fixture.component("0.7.0-rc.1", false);
    let target = component.find_version("0.8.0").unwrap().clone();
    let _instance = RunningInstance::register(&fixture.run_dir, "Labbie").unwrap();
    let before = fixture.live_snapshot();

    // Dropping the resume handle declines.
    let progress: ProgressCallback = Arc::new(|_report: ProgressReport| {});
    let result = fixture
        .orchestrator()
        .with_progress(progress)
        .run(&component, &target, CancelToken::never())
        .await;

    assert!(matches!(result, Err(UpdateError::Cancelled)));
    assert_eq!(fixture.live_snapshot(), before);
}

#[tokio::test]
async fn test_self_update_is_deferred() {
    let fixture = Fixture::new("0.7.0-rc.1");
    fixture.publish(&standard_targets());
    let component = fixture.component("0.7.0-rc.1", true);
    let target = component.find_version("0.8.0").unwrap().clone();

    let outcome = fixture
        .orchestrator()
        .run(&component, &target, CancelToken::never())
        .await
        .unwrap();

    let action = match outcome {
        RolloutOutcome::Deferred(action) => action,
        other => panic!("expected deferred replacement, got {other:?}"),
    };
    assert_eq!(std::fs::read_to_string(fixture.live.join("version.txt")).unwrap(), "0.7.0-rc.1");
    assert_eq!(action.steps[0].from, fixture.live);
    assert_eq!(action.steps[0].to, component.old_version_path());
    assert_eq!(action.steps[1].to, fixture.live);

    tokio::task::spawn_blocking(move || action.execute())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(std::fs::read_to_string(fixture.live.join("version.txt")).unwrap(), "0.8.0");
}

fn stage_dirs(paths: &UpdaterPaths) -> usize {
    std::fs::read_dir(paths.work_dir())
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().starts_with("stage-"))
                .count()
        })
        .unwrap_or(0)
}

/// Start a rollout and park it at the run-state prompt by holding its
/// resume handle.
async fn park_rollout(
    fixture: &Fixture,
    component: &Component,
    target: &patchstep_updater::Version,
    cancel: &CancelHandle,
) -> (
    Arc<Orchestrator>,
    tokio::task::JoinHandle<Result<RolloutOutcome, UpdateError>>,
    Arc<Mutex<Option<patchstep_updater::ResumeHandle>>>,
) {
    let parked = Arc::new(Mutex::new(None));
    let progress: ProgressCallback = {
        let parked = Arc::clone(&parked);
        Arc::new(move |report: ProgressReport| {
            if let Some(Signal::ComponentIsRunning { resume, .. }) = report.signal {
                *parked.lock().unwrap() = Some(resume);
            }
        })
    };
    let orchestrator = Arc::new(fixture.orchestrator().with_progress(progress));

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        let component = component.clone();
        let target = target.clone();
        let token = cancel.token();
        tokio::spawn(async move { orchestrator.run(&component, &target, token).await })
    };

    while orchestrator.state() != RolloutState::AwaitingRunState {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    (orchestrator, first, parked)
}

#[tokio::test]
async fn test_second_rollout_rejected_while_in_flight() {
    let fixture = Fixture::new("0.7.0-rc.1");
    fixture.publish(&standard_targets());
    let component = fixture.component("0.7.0-rc.1", false);
    let target = component.find_version("0.8.0").unwrap().clone();
    let _instance = RunningInstance::register(&fixture.run_dir, "Labbie").unwrap();

    let cancel = CancelHandle::new();
    let (orchestrator, first, parked) = park_rollout(&fixture, &component, &target, &cancel).await;

    let second = orchestrator.run(&component, &target, CancelToken::never()).await;
    assert!(matches!(second, Err(UpdateError::RolloutInProgress(_))));

    cancel.cancel();
    assert!(matches!(first.await.unwrap(), Err(UpdateError::Cancelled)));
    assert!(parked.lock().unwrap().is_some());
}

#[tokio::test]
async fn test_rollouts_sharing_paths_are_serialised() {
    let fixture = Fixture::new("0.7.0-rc.1");
    fixture.publish(&standard_targets());
    let component = fixture.component("0.7.0-rc.1", false);
    let target = component.find_version("0.8.0").unwrap().clone();
    let instance = RunningInstance::register(&fixture.run_dir, "Labbie").unwrap();

    let cancel = CancelHandle::new();
    let (_first_orchestrator, first, parked) =
        park_rollout(&fixture, &component, &target, &cancel).await;
    assert_eq!(stage_dirs(&fixture.paths), 1);

    // A separate orchestrator over the same data dir, as another process would build.
    let other = fixture.orchestrator();
    let second = other.run(&component, &target, CancelToken::never()).await;
    assert!(matches!(second, Err(UpdateError::RolloutInProgress(_))));
    assert_eq!(other.state(), RolloutState::Idle);
    assert_eq!(stage_dirs(&fixture.paths), 1);

    // The first rollout still completes on its own stage.
    let app = tokio::spawn(async move {
        while !instance.exit_requested() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        instance.acknowledge_exit().unwrap();
    });
    let resume = parked.lock().unwrap().take().unwrap();
    resume.resume();
    assert_eq!(first.await.unwrap().unwrap(), RolloutOutcome::Replaced);
    app.await.unwrap();
    assert_eq!(std::fs::read_to_string(fixture.live.join("version.txt")).unwrap(), "0.8.0");

    // Released once the first rollout ends.
    let outcome = other
        .run(&component, component.installed_version(), CancelToken::never())
        .await
        .unwrap();
    assert_eq!(outcome, RolloutOutcome::AlreadyCurrent);
}

#[test]
fn test_run_blocking_inline() {
    let fixture = Fixture::new("0.7.0-rc.1");
    fixture.publish(&standard_targets());
    let component = fixture.component("0.7.0-rc.1", false);
    let target = component.find_version("0.8.0").unwrap().clone();

    let orchestrator = fixture.orchestrator().with_mode(ExecutionMode::Offload);
    let outcome = orchestrator
        .run_blocking(&component, &target, CancelToken::never())
        .unwrap();

    assert_eq!(outcome, RolloutOutcome::Replaced);
    assert_eq!(std::fs::read_to_string(fixture.live.join("version.txt")).unwrap(), "0.8.0");
}
