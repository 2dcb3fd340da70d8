//! A single container instance and its lifecycle operations.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dockhand_common::config::HarnessConfig;
use dockhand_common::error::{DockhandError, Result};
use dockhand_common::types::{ContainerId, ContainerState};

use crate::backend::{ContainerRuntime, ResolvedImage};
use crate::cancel::CancellationToken;
use crate::logs::{LogReader, NextLine, log_buffer};
use crate::pump;
use crate::sink::{LogDispatcher, LogSink};
use crate::wait::ReadinessPredicate;

/// Extra time allowed after the grace period for output to drain.
const STOP_DRAIN_SLACK: Duration = Duration::from_secs(2);

/// How long release waits for the pump after removal before detaching it.
const PUMP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A container owned by the caller that created it.
///
/// Dropping the handle releases the container, so every exit path tears it
/// down.
pub struct ContainerHandle {
    id: ContainerId,
    image: ResolvedImage,
    runtime: Arc<dyn ContainerRuntime>,
    config: HarnessConfig,
    state: ContainerState,
    dispatcher: Arc<LogDispatcher>,
    pump: Option<JoinHandle<()>>,
    created_at: DateTime<Utc>,
}

impl std::fmt::Debug for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerHandle")
            .field("id", &self.id)
            .field("image", &self.image.reference)
            .field("runtime", &self.runtime.name())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ContainerHandle {
    pub(crate) fn new(
        id: ContainerId,
        image: ResolvedImage,
        runtime: Arc<dyn ContainerRuntime>,
        config: HarnessConfig,
    ) -> Self {
        let (writer, _reader) = log_buffer();
        let dispatcher = Arc::new(LogDispatcher::new(
            id.clone(),
            writer,
            config.sink_buffer_capacity,
            config.overflow_policy,
        ));
        Self {
            id,
            image,
            runtime,
            config,
            state: ContainerState::Created,
            dispatcher,
            pump: None,
            created_at: Utc::now(),
        }
    }

    /// Runtime-assigned container identifier.
    #[must_use]
    pub const fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ContainerState {
        self.state
    }

    /// The image this container was created from.
    #[must_use]
    pub const fn image(&self) -> &ResolvedImage {
        &self.image
    }

    /// When the container was created.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// A reader over every line the container has written so far.
    #[must_use]
    pub fn logs(&self) -> LogReader {
        self.dispatcher.reader()
    }

    /// Exit code, once the container's output has ended and the runtime
    /// reported one.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.dispatcher.reader().exit_code().flatten()
    }

    /// Number of lines discarded by full sink queues.
    #[must_use]
    pub fn dropped_lines(&self) -> u64 {
        self.dispatcher.dropped()
    }

    fn transition(&mut self, next: ContainerState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {next}",
            self.state
        );
        tracing::info!(id = %self.id, from = %self.state, to = %next, "container state changed");
        self.state = next;
    }

    fn invalid_state(&self, operation: &'static str) -> DockhandError {
        DockhandError::InvalidState {
            id: self.id.to_string(),
            state: self.state,
            operation,
        }
    }

    /// Launches the container and begins streaming its output.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::InvalidState`] unless the container is
    /// `Created`, or [`DockhandError::Start`] if the runtime cannot launch
    /// it.
    pub fn start(&mut self) -> Result<()> {
        if self.state != ContainerState::Created {
            return Err(self.invalid_state("start"));
        }
        let output = self.runtime.start(&self.id)?;
        match pump::spawn(&self.id, output, Arc::clone(&self.dispatcher)) {
            Ok(handle) => self.pump = Some(handle),
            Err(e) => {
                if let Err(stop_err) = self.runtime.stop(&self.id, self.config.stop_grace_period()) {
                    tracing::warn!(id = %self.id, error = %stop_err, "stop after failed start failed");
                }
                return Err(DockhandError::Start {
                    id: self.id.to_string(),
                    reason: e.to_string(),
                });
            }
        }
        self.transition(ContainerState::Running);
        Ok(())
    }

    /// Blocks until `predicate` matches the container's output.
    ///
    /// Lines are evaluated in order from the first one the container
    /// wrote. A handle that is already `Ready` stays `Ready` and evaluates
    /// the new predicate the same way.
    ///
    /// # Errors
    ///
    /// - [`DockhandError::InvalidState`] unless the container is `Running`
    ///   or `Ready`.
    /// - [`DockhandError::ReadinessTimeout`] once `timeout` has elapsed.
    /// - [`DockhandError::ContainerExited`] if the output ended first.
    /// - [`DockhandError::Cancelled`] if `cancel` fired.
    pub fn wait_for<P: ReadinessPredicate>(
        &mut self,
        mut predicate: P,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !self.state.is_active() {
            return Err(self.invalid_state("wait_for"));
        }
        let started = Instant::now();
        let deadline = started + timeout;
        let poll = self.config.cancel_poll_interval();
        let reader = self.dispatcher.reader();
        tracing::info!(id = %self.id, condition = %predicate.describe(), ?timeout, "waiting for readiness");

        let mut cursor = 0;
        while !predicate.is_satisfied() {
            if cancel.is_cancelled() {
                tracing::info!(id = %self.id, "readiness wait cancelled");
                return Err(DockhandError::Cancelled {
                    id: self.id.to_string(),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DockhandError::ReadinessTimeout {
                    id: self.id.to_string(),
                    timeout,
                    tail: reader.tail(self.config.diagnostic_tail_lines),
                });
            }
            match reader.next(cursor, deadline.min(now + poll)) {
                NextLine::Line(line) => {
                    predicate.observe(&line);
                    cursor += 1;
                }
                NextLine::Closed { exit_code } => {
                    tracing::warn!(id = %self.id, ?exit_code, "container exited before becoming ready");
                    return Err(DockhandError::ContainerExited {
                        id: self.id.to_string(),
                        exit_code,
                        tail: reader.tail(self.config.diagnostic_tail_lines),
                    });
                }
                NextLine::Pending => {}
            }
        }

        tracing::info!(id = %self.id, lines = cursor, elapsed = ?started.elapsed(), "container ready");
        if self.state != ContainerState::Ready {
            self.transition(ContainerState::Ready);
        }
        Ok(())
    }

    /// Registers a sink for every line, starting from the first.
    ///
    /// Delivery happens on a dedicated thread; this call does not block on
    /// the sink.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::InvalidState`] once released, or an I/O
    /// error if the delivery thread cannot be spawned.
    pub fn consume_logs(&self, sink: impl LogSink) -> Result<()> {
        self.consume_logs_boxed(Box::new(sink))
    }

    /// Same as [`Self::consume_logs`] for an already boxed sink.
    ///
    /// # Errors
    ///
    /// See [`Self::consume_logs`].
    pub fn consume_logs_boxed(&self, sink: Box<dyn LogSink>) -> Result<()> {
        if self.state == ContainerState::Released {
            return Err(self.invalid_state("consume_logs"));
        }
        self.dispatcher.register(sink)
    }

    /// Terminates the container. Idempotent.
    ///
    /// The runtime gets the configured grace period before forcing the
    /// stop; the log closes once the remaining output has drained.
    ///
    /// # Errors
    ///
    /// Returns the runtime's error if the container could not be signalled.
    /// The handle is `Stopped` either way.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            ContainerState::Stopped | ContainerState::Released => Ok(()),
            ContainerState::Created => {
                self.transition(ContainerState::Stopped);
                self.dispatcher.close(None);
                Ok(())
            }
            ContainerState::Running | ContainerState::Ready => {
                let grace = self.config.stop_grace_period();
                let result = self.runtime.stop(&self.id, grace);
                self.transition(ContainerState::Stopped);
                if !self
                    .dispatcher
                    .reader()
                    .wait_closed(Instant::now() + grace + STOP_DRAIN_SLACK)
                {
                    tracing::warn!(id = %self.id, "container output still open after stop");
                }
                result
            }
        }
    }

    /// Stops the container if needed, removes it, and joins its threads.
    ///
    /// Idempotent and infallible; failures are logged.
    pub fn release(&mut self) {
        if self.state == ContainerState::Released {
            return;
        }
        if let Err(e) = self.stop() {
            tracing::warn!(id = %self.id, error = %e, "stop during release failed");
        }
        if let Err(e) = self.runtime.remove(&self.id) {
            tracing::warn!(id = %self.id, error = %e, "container removal failed");
        }
        if let Some(pump) = self.pump.take() {
            let closed = self
                .dispatcher
                .reader()
                .wait_closed(Instant::now() + PUMP_JOIN_TIMEOUT);
            if closed || pump.is_finished() {
                if pump.join().is_err() {
                    tracing::warn!(id = %self.id, "log pump panicked");
                }
            } else {
                tracing::warn!(id = %self.id, "log pump still running; detaching");
            }
        }
        self.dispatcher.shutdown();
        self.transition(ContainerState::Released);
    }
}

impl Drop for ContainerHandle {
    fn drop(&mut self) {
        self.release();
    }
}
