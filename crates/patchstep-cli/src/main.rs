//! patchstep CLI entry point

use anyhow::Context;
use clap::Parser;
use patchstep_cli::{logging, Cli, ExitCode};
use patchstep_updater::UpdaterPaths;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let config = match cli.load_config().context("failed to load configuration") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::InvalidInput.to_exit_code();
        }
    };

    // stdout of `check` carries only the version, so it logs to stderr alone
    let log_file = cli.writes_log_file().then(|| {
        config
            .logging
            .file
            .clone()
            .unwrap_or_else(|| UpdaterPaths::new(config.paths.data_dir()).log_file())
    });
    let filter = logging::filter(cli.verbose, cli.debug, &config.logging.level);
    let _guard = logging::init(filter, log_file.as_deref());

    match cli.execute_with_config(config).await {
        Ok(code) => code.to_exit_code(),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::GeneralError.to_exit_code()
        }
    }
}
