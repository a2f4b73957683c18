//! CLI command definitions and dispatch

use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use patchstep_updater::{
    can_skip, check_for_update, Component, ComponentConfig, DeferredReplace, Downloader, ManifestSource,
    PathsConfig, ReleaseType, SkipList, UpdateError, UpdaterConfig, UpdaterPaths, Version,
};
use tracing::{debug, info};

use crate::ExitCode;

/// Config file looked up in the data directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "patchstep.toml";

/// patchstep - incremental updater
#[derive(Parser, Debug)]
#[command(name = "patchstep")]
#[command(version, about = "patchstep - incremental patch-based updater")]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory (downloads, work area, logs)
    #[arg(long, global = true, env = "PATCHSTEP_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Update a component to the latest (or a given) version
    Update(UpdateArgs),

    /// Print the version an update would install; prints nothing when
    /// there is none
    Check(CheckArgs),

    /// Stop offering a version
    Skip(SkipArgs),

    /// Finish a self-update once the updater has exited
    #[command(hide = true)]
    ApplyDeferred(ApplyDeferredArgs),
}

/// Selects the component and how its installed version is known.
#[derive(Args, Debug, Clone, Default)]
pub struct ComponentArgs {
    /// Component name (defaults to the first configured)
    #[arg(long)]
    pub component: Option<String>,

    /// Follow the prerelease channel
    #[arg(long)]
    pub prerelease: bool,

    /// Installed version, overriding the configured one
    #[arg(long)]
    pub current_version: Option<String>,
}

impl ComponentArgs {
    pub fn release_type(&self) -> ReleaseType {
        if self.prerelease {
            ReleaseType::Prerelease
        } else {
            ReleaseType::Release
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub component: ComponentArgs,

    /// Version to roll to instead of the latest
    #[arg(long)]
    pub target: Option<String>,

    /// Run blocking steps on the rollout task instead of the blocking pool
    #[arg(long)]
    pub inline: bool,

    /// Close a running component without asking
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub component: ComponentArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SkipArgs {
    /// Version to skip
    pub version: String,

    #[command(flatten)]
    pub component: ComponentArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ApplyDeferredArgs {
    /// Action file written by the update run
    #[arg(long)]
    pub action: PathBuf,
}

impl Cli {
    /// Whether this invocation writes the updater log file.
    pub fn writes_log_file(&self) -> bool {
        matches!(
            self.command,
            Commands::Update(_) | Commands::ApplyDeferred(_)
        )
    }

    /// Load the config named by `--config`, or the default one from the data
    /// directory if present, then apply command-line overrides.
    pub fn load_config(&self) -> Result<UpdaterConfig, UpdateError> {
        let mut config = match &self.config {
            Some(path) => UpdaterConfig::load_from_file(path)?,
            None => {
                let data_dir = self
                    .data_dir
                    .clone()
                    .unwrap_or_else(|| PathsConfig::default().data_dir());
                let path = data_dir.join(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    UpdaterConfig::load_from_file(&path)?
                } else {
                    UpdaterConfig::default()
                }
            }
        };

        if let Some(data_dir) = &self.data_dir {
            config.paths.data_dir = Some(data_dir.clone());
        }
        if let Commands::Update(args) = &self.command {
            if args.inline {
                config.rollout.mode = patchstep_updater::ExecutionMode::Inline;
            }
        }
        Ok(config)
    }

    /// Execute the CLI command with a pre-loaded configuration
    pub async fn execute_with_config(self, config: UpdaterConfig) -> anyhow::Result<ExitCode> {
        let result = match self.command {
            Commands::Update(args) => crate::update::run(args, &config).await,
            Commands::Check(args) => check(&args, &config).await,
            Commands::Skip(args) => skip(&args, &config).await,
            Commands::ApplyDeferred(args) => apply_deferred(args.action).await,
        };

        match result {
            Ok(code) => Ok(code),
            Err(UpdateError::Unexpected(e)) => Err(e),
            Err(e) => {
                eprintln!("Error: {e}");
                Ok(ExitCode::for_error(&e))
            }
        }
    }
}

/// Fetch the version history and load the selected component.
pub(crate) async fn load_component<'a>(
    config: &'a UpdaterConfig,
    args: &ComponentArgs,
) -> Result<(&'a ComponentConfig, Component), UpdateError> {
    let component_config = config.component(args.component.as_deref())?;
    let descriptor = component_config.descriptor(args.current_version.as_deref())?;
    let source = ManifestSource::new(Downloader::new(&config.network)?);
    let manifest = source.fetch(&component_config.version_history_url).await?;
    let component = descriptor.load(&manifest)?;
    Ok((component_config, component))
}

async fn check(args: &CheckArgs, config: &UpdaterConfig) -> Result<ExitCode, UpdateError> {
    let (_, component) = load_component(config, &args.component).await?;
    let paths = UpdaterPaths::new(config.paths.data_dir());
    let skip_list = SkipList::load(paths.skip_list_file());

    if let Some(version) = check_for_update(&component, args.component.release_type(), &skip_list) {
        let mut stdout = std::io::stdout();
        write!(stdout, "{version}")?;
        stdout.flush()?;
    } else {
        debug!(component = component.name(), "No update available");
    }
    Ok(ExitCode::Success)
}

/// Record a skipped version. Only offers that move the install forward
/// can be skipped; a return from a prerelease to a release cannot.
async fn skip(args: &SkipArgs, config: &UpdaterConfig) -> Result<ExitCode, UpdateError> {
    Version::parse(&args.version, 0)?;
    let (_, component) = load_component(config, &args.component).await?;

    let Some(version) = component.find_version(&args.version) else {
        eprintln!("Error: {} is not a published version of {}", args.version, component.name());
        return Ok(ExitCode::InvalidInput);
    };
    if !can_skip(&component, version) {
        eprintln!(
            "Error: {version} does not move {} past {}; it cannot be skipped",
            component.name(),
            component.installed_version()
        );
        return Ok(ExitCode::InvalidInput);
    }

    let paths = UpdaterPaths::new(config.paths.data_dir());
    let mut skip_list = SkipList::load(paths.skip_list_file());
    skip_list.skip(component.name(), version.as_str())?;
    info!(component = component.name(), %version, "Version skipped");
    Ok(ExitCode::Success)
}

async fn apply_deferred(action: PathBuf) -> Result<ExitCode, UpdateError> {
    info!(action = %action.display(), "Applying deferred replacement");
    tokio::task::spawn_blocking(move || run_action(&action)).await??;
    Ok(ExitCode::Success)
}

fn run_action(path: &Path) -> Result<(), UpdateError> {
    let action = DeferredReplace::load(path)?;
    action.execute()?;
    let _ = std::fs::remove_file(path);
    Ok(())
}
