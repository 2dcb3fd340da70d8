//! Entry point: resolves images and creates container handles.

use dockhand_common::config::HarnessConfig;
use dockhand_common::error::Result;
use dockhand_common::types::ImageReference;

use crate::backend::{self, Backend, ContainerConfig, ResolvedImage};
use crate::container::ContainerHandle;

/// Creates containers on one backend with one configuration.
#[derive(Debug, Clone)]
pub struct ContainerHarness {
    config: HarnessConfig,
    backend: Backend,
}

impl ContainerHarness {
    /// Connects to the backend selected by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the backend is
    /// not installed.
    pub fn new(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        let backend = backend::connect(&config)?;
        tracing::debug!(runtime = backend.runtime.name(), "harness connected");
        Ok(Self { config, backend })
    }

    /// Uses the default configuration with `DOCKHAND_*` overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an override is invalid or the backend is not
    /// installed.
    pub fn from_env() -> Result<Self> {
        Self::new(HarnessConfig::default().apply_env()?)
    }

    /// Uses an explicit backend instead of the one `config` selects.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_backend(config: HarnessConfig, backend: Backend) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, backend })
    }

    /// The configuration handles are created with.
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Name of the runtime backend in use.
    #[must_use]
    pub fn runtime_name(&self) -> &'static str {
        self.backend.runtime.name()
    }

    /// Resolves an image reference without creating anything.
    ///
    /// # Errors
    ///
    /// Returns [`dockhand_common::error::DockhandError::ImageResolution`] if
    /// the image cannot be found.
    pub fn resolve(&self, reference: &ImageReference) -> Result<ResolvedImage> {
        self.backend.images.resolve(reference)
    }

    /// Resolves `reference` and allocates a container in `Created`.
    ///
    /// # Errors
    ///
    /// Returns [`dockhand_common::error::DockhandError::ImageResolution`] if
    /// the image cannot be found, or the runtime's error if the container
    /// cannot be allocated.
    pub fn create(
        &self,
        reference: &ImageReference,
        config: &ContainerConfig,
    ) -> Result<ContainerHandle> {
        let image = self.resolve(reference)?;
        let id = self.backend.runtime.create(&image, config)?;
        tracing::info!(id = %id, image = %image.reference, runtime = self.runtime_name(), "container created");
        Ok(ContainerHandle::new(
            id,
            image,
            std::sync::Arc::clone(&self.backend.runtime),
            self.config.clone(),
        ))
    }
}
