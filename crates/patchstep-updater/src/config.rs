//! Configuration structures for the updater.
//!
//! Defines paths, network, rollout and logging settings plus the list of
//! managed components. Every field has a default so a partial TOML file
//! (or none at all) is valid.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::component::ComponentDescriptor;
use crate::error::UpdateError;

/// Main updater configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdaterConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub rollout: RolloutConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Components this updater manages
    #[serde(default)]
    pub components: Vec<ComponentConfig>,
}

impl UpdaterConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, UpdateError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), UpdateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| UpdateError::ConfigError(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Find a component by name (case-insensitive), or the first one
    /// configured when `name` is `None`.
    pub fn component(&self, name: Option<&str>) -> Result<&ComponentConfig, UpdateError> {
        match name {
            Some(name) => self
                .components
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| UpdateError::ConfigError(format!("unknown component: {name}"))),
            None => self
                .components
                .first()
                .ok_or_else(|| UpdateError::ConfigError("no components configured".to_string())),
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root data directory (empty = platform default)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl PathsConfig {
    /// Get the data directory, using the platform default if not specified.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }
}

/// Network configuration for manifest and target downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Connect timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Read timeout in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_seconds: u64,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            read_timeout_seconds: default_read_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// How blocking rollout steps are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Run filesystem and codec work on the blocking thread pool
    #[default]
    Offload,
    /// Run every step on the calling task (batch/CI use)
    Inline,
}

/// Rollout behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutConfig {
    #[serde(default)]
    pub mode: ExecutionMode,

    /// Interval between run-state polls in milliseconds
    #[serde(default = "default_poll_ms")]
    pub run_state_poll_ms: u64,

    /// Maximum wait for a running component to exit (0 = unbounded)
    #[serde(default)]
    pub run_state_timeout_secs: u64,

    /// Delay before the deferred move of the live directory
    #[serde(default = "default_first_delay")]
    pub deferred_first_delay_ms: u64,

    /// Delay before the deferred move of the staged directory
    #[serde(default = "default_second_delay")]
    pub deferred_second_delay_ms: u64,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            run_state_poll_ms: default_poll_ms(),
            run_state_timeout_secs: 0,
            deferred_first_delay_ms: default_first_delay(),
            deferred_second_delay_ms: default_second_delay(),
        }
    }
}

/// Logging configuration for the binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file (empty = `<data>/logs/updater.log`)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// One managed component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub name: String,

    /// Live install directory
    pub path: PathBuf,

    /// Location of the version history document (URL or local path)
    pub version_history_url: String,

    /// Root of the target repository (URL or local mirror directory)
    pub repository_url: String,

    /// Set for the updater's own install
    #[serde(default)]
    pub replace_requires_process_exit: bool,

    /// Installed version when it cannot be supplied on the command line
    #[serde(default)]
    pub installed_version: Option<String>,

    /// Patch codec command line; the staged dir and patch file are appended
    #[serde(default)]
    pub codec_command: Vec<String>,
}

impl ComponentConfig {
    /// Descriptor for loading, with `installed_version` overriding the
    /// configured one.
    pub fn descriptor(&self, installed_version: Option<&str>) -> Result<ComponentDescriptor, UpdateError> {
        let version = installed_version
            .or(self.installed_version.as_deref())
            .ok_or_else(|| {
                UpdateError::ConfigError(format!(
                    "installed version of {} is not known; pass --current-version",
                    self.name
                ))
            })?;
        Ok(ComponentDescriptor::new(&self.name, &self.path, version)
            .with_replace_requires_process_exit(self.replace_requires_process_exit))
    }
}

// Default value functions for serde
fn default_timeout() -> u64 {
    30
}

fn default_read_timeout() -> u64 {
    60
}

fn default_user_agent() -> String {
    format!("patchstep/{}", env!("CARGO_PKG_VERSION"))
}

fn default_poll_ms() -> u64 {
    50
}

fn default_first_delay() -> u64 {
    1000
}

fn default_second_delay() -> u64 {
    2000
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Get the default data directory.
fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("LOCALAPPDATA") {
            return PathBuf::from(appdata).join("Patchstep");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("Patchstep");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(data_home).join("patchstep");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("patchstep");
        }
    }

    // Fallback
    PathBuf::from(".").join("patchstep-data")
}
