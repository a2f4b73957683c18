//! `update` command: drives one rollout from the terminal.

use std::sync::Arc;

use patchstep_updater::{
    spawn_helper, CancelHandle, CommandPatchCodec, ComponentConfig, DistributionClient,
    Downloader, HttpDistributionClient, LocalDistributionClient, LockFileRunState,
    NetworkConfig, Orchestrator, ProgressCallback, ProgressReport, ResumeHandle, RolloutConfig,
    RolloutOutcome, Signal, SkipList, UpdateError, UpdaterConfig, UpdaterPaths,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cli::{load_component, UpdateArgs};
use crate::ExitCode;

/// Run the update described by `args`.
///
/// Failures before the rollout starts are returned; rollout failures have
/// already been printed through the progress stream and only set the exit
/// code.
pub async fn run(args: UpdateArgs, config: &UpdaterConfig) -> Result<ExitCode, UpdateError> {
    let (component_config, component) = load_component(config, &args.component).await?;

    let target = match &args.target {
        Some(raw) => match component.find_version(raw) {
            Some(version) => version,
            None => {
                eprintln!("Error: {raw} is not a published version of {}", component.name());
                return Ok(ExitCode::InvalidInput);
            }
        },
        None => {
            if component.is_undeployed() {
                eprintln!(
                    "{} {} is newer than any published version, not updating.",
                    component.name(),
                    component.installed_version()
                );
                return Ok(ExitCode::Success);
            }
            match component.latest_version(args.component.release_type()) {
                Some(version) => version,
                None => {
                    eprintln!("No published version of {} to update to.", component.name());
                    return Ok(ExitCode::Success);
                }
            }
        }
    };

    let paths = UpdaterPaths::new(config.paths.data_dir());
    let (prompt_tx, mut prompt_rx) = mpsc::unbounded_channel();
    let orchestrator = Orchestrator::new(
        paths.clone(),
        distribution(component_config, &config.network)?,
        codec(component_config)?,
        Arc::new(run_state(&paths, &config.rollout)),
    )
    .with_config(&config.rollout)
    .with_skip_list(SkipList::load(paths.skip_list_file()))
    .with_progress(progress(args.yes, prompt_tx));

    let cancel = CancelHandle::new();
    let rollout = orchestrator.run(&component, target, cancel.token());
    tokio::pin!(rollout);

    let mut ctrl_c_armed = true;
    let result = loop {
        tokio::select! {
            result = &mut rollout => break result,
            Some((name, resume)) = prompt_rx.recv() => {
                tokio::spawn(answer_prompt(name, resume));
            }
            signal = tokio::signal::ctrl_c(), if ctrl_c_armed => {
                ctrl_c_armed = false;
                match signal {
                    Ok(()) => {
                        eprintln!("Cancelling...");
                        cancel.cancel();
                    }
                    Err(e) => warn!("Ctrl-C handler unavailable: {e}"),
                }
            }
        }
    };

    match result {
        Ok(RolloutOutcome::Deferred(action)) => {
            let helper = spawn_helper(&action, &paths.work_dir())?;
            info!(helper = %helper.display(), "Replacement deferred to helper");
            eprintln!("The update will finish once patchstep exits.");
            Ok(ExitCode::Success)
        }
        Ok(outcome) => {
            info!(component = component.name(), ?outcome, "Rollout finished");
            Ok(ExitCode::Success)
        }
        Err(e) => Ok(ExitCode::for_error(&e)),
    }
}

/// Pick the distribution adapter from the repository location's scheme.
fn distribution(
    component: &ComponentConfig,
    network: &NetworkConfig,
) -> Result<Arc<dyn DistributionClient>, UpdateError> {
    let repository = component.repository_url.as_str();
    if repository.starts_with("http://") || repository.starts_with("https://") {
        Ok(Arc::new(HttpDistributionClient::new(
            repository,
            Downloader::new(network)?,
        )))
    } else {
        let root = repository.strip_prefix("file://").unwrap_or(repository);
        Ok(Arc::new(LocalDistributionClient::new(root)))
    }
}

fn codec(component: &ComponentConfig) -> Result<Arc<CommandPatchCodec>, UpdateError> {
    CommandPatchCodec::from_command_line(&component.codec_command)
        .map(Arc::new)
        .ok_or_else(|| {
            UpdateError::ConfigError(format!("no codec_command configured for {}", component.name))
        })
}

fn run_state(paths: &UpdaterPaths, rollout: &RolloutConfig) -> LockFileRunState {
    let timeout = (rollout.run_state_timeout_secs > 0)
        .then(|| std::time::Duration::from_secs(rollout.run_state_timeout_secs));
    LockFileRunState::new(paths.run_state_dir())
        .with_poll_interval(std::time::Duration::from_millis(rollout.run_state_poll_ms))
        .with_timeout(timeout)
}

/// Print reports to stderr; hand "component is running" prompts to the
/// command loop unless `assume_yes`.
fn progress(
    assume_yes: bool,
    prompts: mpsc::UnboundedSender<(String, ResumeHandle)>,
) -> ProgressCallback {
    Arc::new(move |mut report: ProgressReport| {
        if let Some(signal) = report.signal.take() {
            match signal {
                Signal::ComponentIsRunning { component, resume } => {
                    if assume_yes {
                        resume.resume();
                    } else {
                        // A closed channel drops the handle, which cancels.
                        let _ = prompts.send((component, resume));
                    }
                }
            }
            return;
        }
        if report.message.is_some() {
            eprintln!("{report}");
        }
    })
}

async fn answer_prompt(component: String, resume: ResumeHandle) {
    if confirm_close(&component).await {
        resume.resume();
    }
}

async fn confirm_close(component: &str) -> bool {
    let mut stderr = tokio::io::stderr();
    let question = format!("{component} is running. Close it and continue? [y/N] ");
    if stderr.write_all(question.as_bytes()).await.is_err() || stderr.flush().await.is_err() {
        return false;
    }

    let mut line = String::new();
    match BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
        Ok(_) => is_yes(&line),
        Err(_) => false,
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
