//! Container lifecycle harness for Dockhand.
//!
//! Start a container from an image reference, stream its output to sinks,
//! block until a readiness predicate matches, and tear it down when the
//! [`ContainerHandle`] goes out of scope.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod cancel;
pub mod container;
pub mod harness;
pub mod logs;
pub mod pump;
pub mod sink;
pub mod wait;

pub use cancel::CancellationToken;
pub use container::ContainerHandle;
pub use harness::ContainerHarness;
pub use sink::{FileSink, LogSink, StreamFilter};
pub use wait::{ReadinessPredicate, WaitFor};
