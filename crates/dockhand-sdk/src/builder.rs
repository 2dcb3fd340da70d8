//! Fluent API for configuring and launching containers.

use std::path::PathBuf;
use std::time::Duration;

use dockhand_common::error::Result;
use dockhand_common::types::ImageReference;
use dockhand_runtime::backend::ContainerConfig;
use dockhand_runtime::{
    CancellationToken, ContainerHandle, ContainerHarness, FileSink, LogSink, ReadinessPredicate,
};

/// Builder for configuring a container before launch.
///
/// [`start`](Self::start) creates the container, attaches log consumers,
/// launches it and waits for readiness. If any step fails the partially
/// started container is released before the error is returned.
pub struct ContainerBuilder {
    image: String,
    config: ContainerConfig,
    wait: Option<Box<dyn ReadinessPredicate>>,
    startup_timeout: Option<Duration>,
    consumers: Vec<Box<dyn LogSink>>,
    log_file: Option<PathBuf>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ContainerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerBuilder")
            .field("image", &self.image)
            .field("config", &self.config)
            .field("wait", &self.wait.as_ref().map(|p| p.describe()))
            .field("startup_timeout", &self.startup_timeout)
            .field("consumers", &self.consumers.len())
            .field("log_file", &self.log_file)
            .finish_non_exhaustive()
    }
}

impl ContainerBuilder {
    /// Creates a builder for the given image reference.
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            config: ContainerConfig::default(),
            wait: None,
            startup_timeout: None,
            consumers: Vec::new(),
            log_file: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Sets the command passed to the image entrypoint.
    #[must_use]
    pub fn command<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.command = args.into_iter().map(Into::into).collect();
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env.push((key.into(), value.into()));
        self
    }

    /// Adds a container label.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.labels.push((key.into(), value.into()));
        self
    }

    /// Sets the container name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    /// Sets the working directory inside the container.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.working_dir = Some(dir.into());
        self
    }

    /// Waits for `predicate` before [`start`](Self::start) returns.
    #[must_use]
    pub fn wait_for(mut self, predicate: impl ReadinessPredicate + 'static) -> Self {
        self.wait = Some(Box::new(predicate));
        self
    }

    /// Overrides the harness's default readiness timeout.
    #[must_use]
    pub const fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = Some(timeout);
        self
    }

    /// Adds a consumer that receives every log line from the first.
    #[must_use]
    pub fn log_consumer(mut self, sink: impl LogSink) -> Self {
        self.consumers.push(Box::new(sink));
        self
    }

    /// Appends every log line to a file.
    #[must_use]
    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Uses `token` to abort the readiness wait.
    #[must_use]
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Creates, starts and waits for the container.
    ///
    /// The returned handle is `Ready` when a predicate was given and
    /// `Running` otherwise. Dropping it releases the container.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference is invalid, or if any lifecycle
    /// step fails. The container has already been released when this
    /// returns an error.
    pub fn start(self, harness: &ContainerHarness) -> Result<ContainerHandle> {
        let reference = ImageReference::parse(&self.image)?;
        let mut handle = harness.create(&reference, &self.config)?;

        if let Some(path) = &self.log_file {
            handle.consume_logs(FileSink::open(path)?)?;
        }
        for sink in self.consumers {
            handle.consume_logs_boxed(sink)?;
        }

        handle.start()?;
        if let Some(predicate) = self.wait {
            let timeout = self
                .startup_timeout
                .unwrap_or_else(|| harness.config().startup_timeout());
            handle.wait_for(predicate, timeout, &self.cancel)?;
        }
        tracing::debug!(id = %handle.id(), state = %handle.state(), "container launched");
        Ok(handle)
    }
}
