//! Runtime backend abstraction.
//!
//! The harness never launches anything itself: images are resolved by an
//! [`ImageProvider`] and processes are driven by a [`ContainerRuntime`].
//! Two backends ship with the crate: the `docker`/`podman` command-line
//! clients and plain host processes.

pub mod cli;
pub mod process;

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dockhand_common::config::{HarnessConfig, RuntimeKind};
use dockhand_common::constants::CONTAINER_CLIS;
use dockhand_common::error::{DockhandError, Result};
use dockhand_common::types::{ContainerId, ImageReference};

/// Configuration for creating a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Optional container name.
    pub name: Option<String>,
    /// Command (arguments to the image entrypoint).
    pub command: Vec<String>,
    /// Environment variables.
    pub env: Vec<(String, String)>,
    /// Extra labels attached to the container.
    pub labels: Vec<(String, String)>,
    /// Working directory inside the container.
    pub working_dir: Option<PathBuf>,
}

/// An image reference the provider has located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    /// Reference that was resolved, after any registry redirection.
    pub reference: ImageReference,
    /// Backend-specific identifier of the launchable image.
    pub id: String,
}

/// Byte stream of container output.
pub type OutputReader = Box<dyn Read + Send>;

/// Blocks until the container process has exited and returns its exit code.
pub type ExitWaiter = Box<dyn FnOnce() -> Option<i32> + Send>;

/// Output streams of a started container.
pub struct AttachedOutput {
    /// Standard output.
    pub stdout: OutputReader,
    /// Standard error, when the runtime exposes it separately.
    pub stderr: Option<OutputReader>,
    /// Called once both streams reached end of file.
    pub exit: ExitWaiter,
}

impl std::fmt::Debug for AttachedOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachedOutput")
            .field("stderr", &self.stderr.is_some())
            .finish_non_exhaustive()
    }
}

/// Locates launchable images.
pub trait ImageProvider: Send + Sync {
    /// Resolves a reference to a launchable image.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::ImageResolution`] if the image cannot be
    /// found locally or remotely.
    fn resolve(&self, reference: &ImageReference) -> Result<ResolvedImage>;
}

/// Drives container processes.
///
/// Implementors handle the platform-specific details of creation,
/// launch, and teardown.
pub trait ContainerRuntime: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// Allocates a container for a resolved image without starting it.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be allocated.
    fn create(&self, image: &ResolvedImage, config: &ContainerConfig) -> Result<ContainerId>;

    /// Launches a created container and attaches to its output from the
    /// first byte it writes.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::Start`] if the process cannot be launched.
    fn start(&self, id: &ContainerId) -> Result<AttachedOutput>;

    /// Terminates a running container, forcing it after `grace`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be signalled.
    fn stop(&self, id: &ContainerId, grace: Duration) -> Result<()>;

    /// Removes a container and everything the runtime allocated for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be removed.
    fn remove(&self, id: &ContainerId) -> Result<()>;

    /// Returns whether this backend is operational on the current host.
    fn is_available(&self) -> bool;
}

/// An image provider paired with the runtime that launches its images.
#[derive(Clone)]
pub struct Backend {
    /// Image resolution.
    pub images: Arc<dyn ImageProvider>,
    /// Process lifecycle.
    pub runtime: Arc<dyn ContainerRuntime>,
}

impl Backend {
    /// Pairs an image provider with a runtime.
    #[must_use]
    pub fn new(images: Arc<dyn ImageProvider>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { images, runtime }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("runtime", &self.runtime.name())
            .finish_non_exhaustive()
    }
}

/// Builds the backend selected by `config.runtime`.
///
/// # Errors
///
/// Returns [`DockhandError::NotFound`] if the requested container CLI is not
/// installed, or if `auto` finds none.
pub fn connect(config: &HarnessConfig) -> Result<Backend> {
    match config.runtime {
        RuntimeKind::Process => {
            let runtime = Arc::new(process::ProcessRuntime::new());
            Ok(Backend::new(Arc::new(process::ProcessImageProvider), runtime))
        }
        RuntimeKind::Docker => cli_backend("docker", config),
        RuntimeKind::Podman => cli_backend("podman", config),
        RuntimeKind::Auto => {
            let program = CONTAINER_CLIS
                .iter()
                .copied()
                .find(|p| which::which(p).is_ok())
                .ok_or_else(|| DockhandError::NotFound {
                    kind: "container CLI",
                    id: CONTAINER_CLIS.join(" or "),
                })?;
            tracing::debug!(program, "auto-detected container CLI");
            cli_backend(program, config)
        }
    }
}

fn cli_backend(program: &'static str, config: &HarnessConfig) -> Result<Backend> {
    let cli = Arc::new(cli::CliBackend::locate(program, config)?);
    Ok(Backend::new(cli.clone(), cli))
}

/// Availability of one backend on this host.
#[derive(Debug, Clone)]
pub struct RuntimeInfo {
    /// Backend kind.
    pub kind: RuntimeKind,
    /// Resolved binary, for CLI backends.
    pub binary: Option<PathBuf>,
    /// Whether the backend answered its availability probe.
    pub available: bool,
}

/// Probes every backend kind and reports what this host supports.
#[must_use]
pub fn probe_runtimes(config: &HarnessConfig) -> Vec<RuntimeInfo> {
    let mut infos = vec![RuntimeInfo {
        kind: RuntimeKind::Process,
        binary: None,
        available: process::ProcessRuntime::new().is_available(),
    }];
    for (kind, program) in [
        (RuntimeKind::Docker, "docker"),
        (RuntimeKind::Podman, "podman"),
    ] {
        let info = match cli::CliBackend::locate(program, config) {
            Ok(cli) => RuntimeInfo {
                kind,
                binary: Some(cli.binary().to_path_buf()),
                available: cli.is_available(),
            },
            Err(_) => RuntimeInfo {
                kind,
                binary: None,
                available: false,
            },
        };
        infos.push(info);
    }
    infos
}
