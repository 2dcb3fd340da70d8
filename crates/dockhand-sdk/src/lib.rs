//! # dockhand-sdk
//!
//! Public SDK for using Dockhand as a Rust library.
//!
//! [`ContainerBuilder`](builder::ContainerBuilder) composes the harness
//! operations into one call: create the container, attach log consumers,
//! start it, and wait until it is ready. The returned handle cleans the
//! container up when dropped.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use dockhand_runtime::{ContainerHarness, WaitFor};
//! use dockhand_sdk::builder::ContainerBuilder;
//!
//! # fn main() -> dockhand_common::error::Result<()> {
//! let harness = ContainerHarness::from_env()?;
//! let container = ContainerBuilder::new("example/example-java-app")
//!     .wait_for(WaitFor::log_line("Hello World!"))
//!     .startup_timeout(Duration::from_secs(10))
//!     .log_consumer(|line: &dockhand_common::types::LogLine| eprintln!("{line}"))
//!     .start(&harness)?;
//! assert!(container.state().is_active());
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod builder;

pub use builder::ContainerBuilder;
