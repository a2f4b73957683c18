//! Progress reports streamed to the caller during a rollout.

use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;

/// Lets a rollout waiting on user interaction continue.
///
/// Dropping the handle without calling `resume` cancels the rollout.
#[derive(Debug)]
pub struct ResumeHandle(oneshot::Sender<()>);

impl ResumeHandle {
    pub(crate) fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    pub fn resume(self) {
        let _ = self.0.send(());
    }
}

/// Interaction the caller must handle.
#[derive(Debug)]
pub enum Signal {
    /// The component about to be replaced is running. Once the user agrees
    /// to close it, call `resume`; the rollout then asks it to exit and
    /// waits for the acknowledgement.
    ComponentIsRunning {
        component: String,
        resume: ResumeHandle,
    },
}

/// One progress event.
#[derive(Debug, Default)]
pub struct ProgressReport {
    pub message: Option<String>,
    /// Overall completion, 0..=100
    pub percent: Option<u8>,
    pub error: bool,
    pub signal: Option<Signal>,
}

impl ProgressReport {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn step(message: impl Into<String>, percent: u8) -> Self {
        Self {
            message: Some(message.into()),
            percent: Some(percent.min(100)),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            error: true,
            ..Self::default()
        }
    }

    pub fn signal(signal: Signal) -> Self {
        Self {
            signal: Some(signal),
            ..Self::default()
        }
    }

    /// Whether this report completes the rollout successfully.
    pub fn is_last(&self) -> bool {
        self.percent == Some(100)
    }
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(percent) = self.percent {
            write!(f, "[{percent:>3}%] ")?;
        }
        match (&self.message, &self.signal) {
            (Some(message), _) => f.write_str(message),
            (None, Some(Signal::ComponentIsRunning { component, .. })) => {
                write!(f, "{component} is running")
            }
            (None, None) => Ok(()),
        }
    }
}

/// Receives progress reports; called from the rollout task.
pub type ProgressCallback = Arc<dyn Fn(ProgressReport) + Send + Sync>;

/// A callback that discards every report.
pub fn silent() -> ProgressCallback {
    Arc::new(|_| {})
}

/// Share-based progress accounting for a rollout.
///
/// Fixed shares: clean 5, refresh 2, resolve 3, copy 10, replace 5. The
/// remaining 75 is split evenly over the download and apply half of every
/// plan step; the integer remainder goes to the replace step so a finished
/// rollout always reaches 100.
#[derive(Debug, Clone)]
pub(crate) struct ProgressShares {
    pub per_action: u8,
    pub extra: u8,
}

pub(crate) const CLEAN_SHARE: u8 = 5;
pub(crate) const REFRESH_SHARE: u8 = 2;
pub(crate) const RESOLVE_SHARE: u8 = 3;
pub(crate) const COPY_SHARE: u8 = 10;
pub(crate) const REPLACE_SHARE: u8 = 5;

impl ProgressShares {
    pub fn for_steps(steps: usize) -> Self {
        let remainder =
            100 - CLEAN_SHARE - REFRESH_SHARE - RESOLVE_SHARE - COPY_SHARE - REPLACE_SHARE;
        let actions = steps.max(1) * 2;
        let per_action = (remainder as usize / actions) as u8;
        let extra = remainder - (per_action as usize * steps * 2).min(remainder as usize) as u8;
        Self { per_action, extra }
    }
}
