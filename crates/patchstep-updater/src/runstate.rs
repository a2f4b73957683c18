//! Run-state negotiation with a live component.
//!
//! Before the live directory of a component can be swapped, its process
//! must be gone. The updater asks whether it is running, requests an exit,
//! and waits for the acknowledgement. The lock-file adapter implements the
//! exchange with two files per component:
//!
//! - `<dir>/<name>.running`, held by the running component
//! - `<dir>/<name>.exit-requested`, written by the updater
//!
//! The component polls for the request and acknowledges by removing both.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::UpdateError;

/// Default interval between acknowledgement polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Cross-process "is it running / please exit" channel.
#[async_trait]
pub trait RunStateSignal: Send + Sync {
    async fn is_running(&self, component: &str) -> Result<bool, UpdateError>;

    async fn request_exit(&self, component: &str) -> Result<(), UpdateError>;

    /// Resolve once the component has acknowledged the exit request.
    ///
    /// Returns `Cancelled` if `cancel` fires first.
    async fn await_exit(&self, component: &str, cancel: &CancelToken) -> Result<(), UpdateError>;
}

fn running_file(dir: &Path, component: &str) -> PathBuf {
    dir.join(format!("{}.running", component.to_lowercase()))
}

fn exit_request_file(dir: &Path, component: &str) -> PathBuf {
    dir.join(format!("{}.exit-requested", component.to_lowercase()))
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Lock-file implementation of `RunStateSignal`.
#[derive(Debug, Clone)]
pub struct LockFileRunState {
    dir: PathBuf,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl LockFileRunState {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Give up waiting after `timeout`; `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl RunStateSignal for LockFileRunState {
    async fn is_running(&self, component: &str) -> Result<bool, UpdateError> {
        Ok(tokio::fs::try_exists(running_file(&self.dir, component)).await?)
    }

    async fn request_exit(&self, component: &str) -> Result<(), UpdateError> {
        info!(component, "Requesting running component to exit");
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(exit_request_file(&self.dir, component), b"")
            .await
            .map_err(|e| UpdateError::RunState(format!("failed to request exit of {component}: {e}")))
    }

    async fn await_exit(&self, component: &str, cancel: &CancelToken) -> Result<(), UpdateError> {
        let started = Instant::now();
        loop {
            if !self.is_running(component).await? {
                debug!(component, waited_ms = started.elapsed().as_millis() as u64, "Component exited");
                return Ok(());
            }

            if let Some(timeout) = self.timeout {
                if started.elapsed() >= timeout {
                    warn!(component, "Timed out waiting for component to exit");
                    return Err(UpdateError::RunState(format!(
                        "{component} did not exit within {}s",
                        timeout.as_secs()
                    )));
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
            }
        }
    }
}

/// The running side of the lock-file protocol.
///
/// Held by a component for as long as it runs; the lock files are removed
/// when the instance is dropped.
#[derive(Debug)]
pub struct RunningInstance {
    running: PathBuf,
    exit_request: PathBuf,
}

impl RunningInstance {
    /// Announce that `component` is running.
    pub fn register(dir: &Path, component: &str) -> Result<Self, UpdateError> {
        std::fs::create_dir_all(dir)?;
        let instance = Self {
            running: running_file(dir, component),
            exit_request: exit_request_file(dir, component),
        };
        // A request left over from an earlier run is not meant for us.
        remove_if_present(&instance.exit_request)?;
        std::fs::write(&instance.running, std::process::id().to_string())?;
        Ok(instance)
    }

    /// Whether the updater has asked this instance to exit.
    pub fn exit_requested(&self) -> bool {
        self.exit_request.exists()
    }

    /// Confirm the exit; the updater may proceed once this returns.
    pub fn acknowledge_exit(self) -> Result<(), UpdateError> {
        self.release()?;
        Ok(())
    }

    fn release(&self) -> io::Result<()> {
        remove_if_present(&self.exit_request)?;
        remove_if_present(&self.running)
    }
}

impl Drop for RunningInstance {
    fn drop(&mut self) {
        let _ = self.release();
    }
}
