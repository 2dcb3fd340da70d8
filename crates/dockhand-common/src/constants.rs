//! System-wide constants and defaults.

/// Application name used in CLI output, labels, and thread names.
pub const APP_NAME: &str = "dockhand";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "dockhand";

/// Tag assumed when a reference names neither tag nor digest.
pub const DEFAULT_TAG: &str = "latest";

/// Label attached to every container created through the CLI runtime.
pub const MANAGED_LABEL: &str = "io.dockhand.managed=true";

/// Environment variable selecting the runtime backend.
pub const ENV_RUNTIME: &str = "DOCKHAND_RUNTIME";

/// Environment variable naming a registry host to redirect unqualified images to.
pub const ENV_REGISTRY: &str = "DOCKHAND_REGISTRY";

/// Container CLIs probed, in order, when the runtime is `auto`.
pub const CONTAINER_CLIS: &[&str] = &["docker", "podman"];

/// Default time allowed for a container to become ready.
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 60_000;

/// Default window between the graceful and the forced stop signal.
pub const DEFAULT_STOP_GRACE_PERIOD_MS: u64 = 5_000;

/// Default capacity of each sink's delivery queue, in lines.
pub const DEFAULT_SINK_BUFFER_CAPACITY: usize = 1024;

/// Default number of trailing lines attached to readiness errors.
pub const DEFAULT_DIAGNOSTIC_TAIL_LINES: usize = 20;

/// Default upper bound on how long a cancelled wait keeps blocking.
pub const DEFAULT_CANCEL_POLL_INTERVAL_MS: u64 = 25;

/// Size of the chunk read from a container output stream at once.
pub const READ_CHUNK_SIZE: usize = 8 * 1024;
