//! Configuration model for the harness.
//!
//! Loaded from a JSON file (every field optional), then overridden from the
//! environment, then validated.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{DockhandError, Result};

/// Which runtime backend launches containers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    /// First container CLI found on `PATH`.
    #[default]
    Auto,
    /// The `docker` CLI.
    Docker,
    /// The `podman` CLI.
    Podman,
    /// Host processes; the image name is an executable.
    Process,
}

impl FromStr for RuntimeKind {
    type Err = DockhandError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            "process" => Ok(Self::Process),
            other => Err(DockhandError::Config {
                message: format!("unknown runtime {other:?} (expected auto, docker, podman, process)"),
            }),
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Docker => write!(f, "docker"),
            Self::Podman => write!(f, "podman"),
            Self::Process => write!(f, "process"),
        }
    }
}

/// When the container CLI image provider pulls from a registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullPolicy {
    /// Pull only when the image is not present locally.
    #[default]
    Missing,
    /// Always pull before resolving.
    Always,
    /// Never pull; resolution fails for images not present locally.
    Never,
}

/// What the log producer does when a sink's queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Block the producer until the sink has room.
    #[default]
    Block,
    /// Discard the line for that sink only and count the drop.
    DropNewest,
}

/// Root configuration for the harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Runtime backend selection.
    pub runtime: RuntimeKind,
    /// Registry host unqualified image names are redirected to.
    pub registry: Option<String>,
    /// Image pull behaviour for container CLI backends.
    pub pull_policy: PullPolicy,
    /// Default readiness timeout, in milliseconds.
    pub startup_timeout_ms: u64,
    /// Time between the graceful and forced stop signal, in milliseconds.
    pub stop_grace_period_ms: u64,
    /// Capacity of each sink's delivery queue, in lines.
    pub sink_buffer_capacity: usize,
    /// Behaviour when a sink queue is full.
    pub overflow_policy: OverflowPolicy,
    /// Number of trailing log lines attached to readiness errors.
    pub diagnostic_tail_lines: usize,
    /// Maximum slice a wait blocks before re-checking cancellation, in milliseconds.
    pub cancel_poll_interval_ms: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::Auto,
            registry: None,
            pull_policy: PullPolicy::Missing,
            startup_timeout_ms: constants::DEFAULT_STARTUP_TIMEOUT_MS,
            stop_grace_period_ms: constants::DEFAULT_STOP_GRACE_PERIOD_MS,
            sink_buffer_capacity: constants::DEFAULT_SINK_BUFFER_CAPACITY,
            overflow_policy: OverflowPolicy::Block,
            diagnostic_tail_lines: constants::DEFAULT_DIAGNOSTIC_TAIL_LINES,
            cancel_poll_interval_ms: constants::DEFAULT_CANCEL_POLL_INTERVAL_MS,
        }
    }
}

impl HarnessConfig {
    /// Loads a configuration file and validates it.
    ///
    /// Fields missing from the file keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DockhandError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `DOCKHAND_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an override has an invalid value.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup`, keyed by environment variable name.
    ///
    /// # Errors
    ///
    /// Returns an error if an override has an invalid value.
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(runtime) = lookup(constants::ENV_RUNTIME) {
            self.runtime = runtime.parse()?;
        }
        if let Some(registry) = lookup(constants::ENV_REGISTRY) {
            let registry = registry.trim().to_string();
            self.registry = (!registry.is_empty()).then_some(registry);
        }
        self.validate()?;
        Ok(self)
    }

    /// Checks invariants the harness relies on.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::Config`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.sink_buffer_capacity == 0 {
            return Err(DockhandError::Config {
                message: "sink_buffer_capacity must be at least 1".into(),
            });
        }
        if self.cancel_poll_interval_ms == 0 {
            return Err(DockhandError::Config {
                message: "cancel_poll_interval_ms must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Default readiness timeout.
    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Graceful stop window.
    #[must_use]
    pub const fn stop_grace_period(&self) -> Duration {
        Duration::from_millis(self.stop_grace_period_ms)
    }

    /// Cancellation reaction bound.
    #[must_use]
    pub const fn cancel_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_interval_ms)
    }
}
