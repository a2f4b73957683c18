//! Logging setup for the binary.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Keeps the file writer flushing until dropped.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Pick the filter: `--debug`, then `--verbose`, then `RUST_LOG`, then the
/// configured level.
pub fn filter(verbose: bool, debug: bool, configured: &str) -> EnvFilter {
    if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(configured))
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    }
}

/// Install the global subscriber: stderr always, plus `log_file` when given.
///
/// The log file is truncated so it only ever holds the latest run.
pub fn init(filter: EnvFilter, log_file: Option<&Path>) -> LoggingGuard {
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let mut file_error = None;
    let (file_layer, guard) = match log_file.and_then(|path| Some((path.parent()?, path.file_name()?))) {
        Some((dir, name)) => match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let _ = std::fs::remove_file(dir.join(name));
                let appender = tracing_appender::rolling::never(dir, name);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer().with_writer(writer).with_ansi(false);
                (Some(layer), Some(guard))
            }
            Err(e) => {
                file_error = Some(format!("log dir init failed for {}: {e}", dir.display()));
                (None, None)
            }
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(filter)
        .init();

    if let Some(error) = file_error {
        tracing::warn!("{error}");
    }

    LoggingGuard { _file: guard }
}
