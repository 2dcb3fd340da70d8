//! Unified error types for the Dockhand workspace.
//!
//! The lifecycle variants (`ImageResolution`, `Start`, `ReadinessTimeout`,
//! `ContainerExited`, `Cancelled`) are surfaced to callers unmodified. The
//! harness never retries on their behalf.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::ContainerState;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum DockhandError {
    /// The image reference could not be resolved locally or remotely.
    #[error("cannot resolve image {reference}: {reason}")]
    ImageResolution {
        /// Reference as requested by the caller.
        reference: String,
        /// Why resolution failed.
        reason: String,
    },

    /// The container process could not be launched.
    #[error("failed to start container {id}: {reason}")]
    Start {
        /// Container that failed to start.
        id: String,
        /// Why the launch failed.
        reason: String,
    },

    /// The readiness predicate did not match before the timeout.
    #[error(
        "container {id} not ready after {timeout:?}{}",
        format_tail(.tail)
    )]
    ReadinessTimeout {
        /// Container that was being waited on.
        id: String,
        /// The timeout that elapsed.
        timeout: Duration,
        /// Last observed log lines, oldest first.
        tail: Vec<String>,
    },

    /// The container process exited before it became ready.
    #[error(
        "container {id} exited before becoming ready (exit code {}){}",
        .exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string()),
        format_tail(.tail)
    )]
    ContainerExited {
        /// Container that exited.
        id: String,
        /// Exit code, when the runtime reported one.
        exit_code: Option<i32>,
        /// Last observed log lines, oldest first.
        tail: Vec<String>,
    },

    /// The wait was cancelled through a cancellation token.
    #[error("wait on container {id} was cancelled")]
    Cancelled {
        /// Container that was being waited on.
        id: String,
    },

    /// An image reference string is malformed.
    #[error("invalid image reference {reference:?}: {reason}")]
    InvalidReference {
        /// The offending input.
        reference: String,
        /// What is wrong with it.
        reason: String,
    },

    /// An operation was requested in a lifecycle state that forbids it.
    #[error("cannot {operation} container {id} in state {state}")]
    InvalidState {
        /// Container the operation targeted.
        id: String,
        /// State the container was in.
        state: ContainerState,
        /// Operation that was refused.
        operation: &'static str,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path (or pseudo-path such as a binary name) where the error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl DockhandError {
    /// Returns the diagnostic log tail carried by this error, if any.
    #[must_use]
    pub fn tail(&self) -> Option<&[String]> {
        match self {
            Self::ReadinessTimeout { tail, .. } | Self::ContainerExited { tail, .. } => Some(tail),
            _ => None,
        }
    }

    /// Returns whether this error was caused by external cancellation
    /// rather than a harness failure.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

fn format_tail(tail: &[String]) -> String {
    if tail.is_empty() {
        return String::new();
    }
    let mut out = format!("; last {} line(s):", tail.len());
    for line in tail {
        out.push_str("\n  | ");
        out.push_str(line);
    }
    out
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, DockhandError>;
