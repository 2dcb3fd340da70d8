//! Log sinks and their fan-out.
//!
//! Each registered sink runs on its own delivery thread, fed through a
//! bounded queue. The dispatcher owns the container's [`LogWriter`], so
//! appending a line and handing it to every sink happen under one lock:
//! a sink registered at any moment receives the backlog up to that point,
//! then every later line, with no gap and no duplicate.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use dockhand_common::config::OverflowPolicy;
use dockhand_common::constants::APP_NAME;
use dockhand_common::error::{DockhandError, Result};
use dockhand_common::types::{ContainerId, LogLine, LogStream};

use crate::logs::{LogReader, LogWriter};

/// A consumer of container log lines.
///
/// Closures `FnMut(&LogLine)` are sinks.
pub trait LogSink: Send + 'static {
    /// Receives the next line, in production order.
    fn accept(&mut self, line: &LogLine);

    /// Called once after the last line has been delivered.
    fn finish(&mut self) {}
}

impl<F> LogSink for F
where
    F: FnMut(&LogLine) + Send + 'static,
{
    fn accept(&mut self, line: &LogLine) {
        self(line);
    }
}

/// Appends every line to a file, one per line.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    out: BufWriter<File>,
}

impl FileSink {
    /// Opens `path` for appending, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DockhandError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| DockhandError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
        })
    }
}

impl LogSink for FileSink {
    fn accept(&mut self, line: &LogLine) {
        if let Err(e) = writeln!(self.out, "{}", line.text) {
            tracing::warn!(path = %self.path.display(), error = %e, "cannot write log line");
        }
    }

    fn finish(&mut self) {
        if let Err(e) = self.out.flush() {
            tracing::warn!(path = %self.path.display(), error = %e, "cannot flush log file");
        }
    }
}

/// Keeps only the lines of one stream.
#[derive(Debug)]
pub struct StreamFilter<S> {
    stream: LogStream,
    inner: S,
}

impl<S: LogSink> StreamFilter<S> {
    /// Forwards lines from `stream` to `inner`.
    pub const fn new(stream: LogStream, inner: S) -> Self {
        Self { stream, inner }
    }
}

impl<S: LogSink> LogSink for StreamFilter<S> {
    fn accept(&mut self, line: &LogLine) {
        if line.stream == self.stream {
            self.inner.accept(line);
        }
    }

    fn finish(&mut self) {
        self.inner.finish();
    }
}

struct SinkSlot {
    index: usize,
    tx: SyncSender<Arc<LogLine>>,
    dropped: u64,
}

struct DispatchState {
    writer: LogWriter,
    slots: Vec<SinkSlot>,
    threads: Vec<JoinHandle<()>>,
    registered: usize,
}

/// Owns a container's log writer and fans lines out to sinks.
pub struct LogDispatcher {
    id: ContainerId,
    capacity: usize,
    policy: OverflowPolicy,
    reader: LogReader,
    state: Mutex<DispatchState>,
    dropped: AtomicU64,
}

impl std::fmt::Debug for LogDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogDispatcher")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl LogDispatcher {
    /// Wraps `writer`; each sink gets a queue of `capacity` lines.
    #[must_use]
    pub fn new(
        id: ContainerId,
        writer: LogWriter,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> Self {
        let reader = writer.reader();
        Self {
            id,
            capacity: capacity.max(1),
            policy,
            reader,
            state: Mutex::new(DispatchState {
                writer,
                slots: Vec::new(),
                threads: Vec::new(),
                registered: 0,
            }),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a reader over the log this dispatcher writes.
    #[must_use]
    pub fn reader(&self) -> LogReader {
        self.reader.clone()
    }

    /// Total number of lines discarded across all sinks.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Registers a sink and starts its delivery thread.
    ///
    /// The sink first receives every line already in the log, then each
    /// new line. Registering after the log closed delivers the backlog and
    /// finishes the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the delivery thread cannot be spawned.
    pub fn register(&self, sink: Box<dyn LogSink>) -> Result<()> {
        let mut state = self.lock();
        let backlog = self.reader.snapshot();
        let index = state.registered;
        state.registered += 1;

        let rx = if self.reader.is_closed() {
            None
        } else {
            let (tx, rx) = mpsc::sync_channel(self.capacity);
            state.slots.push(SinkSlot {
                index,
                tx,
                dropped: 0,
            });
            Some(rx)
        };

        let spawned = std::thread::Builder::new()
            .name(format!("{APP_NAME}-sink-{}-{index}", self.id.short()))
            .spawn(move || deliver(sink, backlog, rx));
        match spawned {
            Ok(handle) => {
                state.threads.push(handle);
                tracing::debug!(id = %self.id, sink = index, "log sink registered");
                Ok(())
            }
            Err(e) => {
                state.slots.retain(|s| s.index != index);
                Err(DockhandError::Io {
                    path: PathBuf::from("sink thread"),
                    source: e,
                })
            }
        }
    }

    /// Appends a line and hands it to every sink.
    ///
    /// Under [`OverflowPolicy::Block`] this waits for room in each full
    /// queue; under [`OverflowPolicy::DropNewest`] a full queue loses this
    /// line. Sinks whose delivery thread has died are unregistered.
    pub fn publish(&self, stream: LogStream, text: String) {
        let mut state = self.lock();
        let Some(line) = state.writer.append(stream, text) else {
            return;
        };
        let policy = self.policy;
        let id = &self.id;
        let total = &self.dropped;
        state.slots.retain_mut(|slot| match policy {
            OverflowPolicy::Block => match slot.tx.send(Arc::clone(&line)) {
                Ok(()) => true,
                Err(_) => {
                    tracing::warn!(id = %id, sink = slot.index, "log sink stopped; unregistering");
                    false
                }
            },
            OverflowPolicy::DropNewest => match slot.tx.try_send(Arc::clone(&line)) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    slot.dropped += 1;
                    let _ = total.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        id = %id,
                        sink = slot.index,
                        seq = line.seq,
                        dropped = slot.dropped,
                        "log sink full; line dropped"
                    );
                    true
                }
                Err(TrySendError::Disconnected(_)) => {
                    tracing::warn!(id = %id, sink = slot.index, "log sink stopped; unregistering");
                    false
                }
            },
        });
    }

    /// Closes the log and lets every sink drain and finish. Idempotent.
    pub fn close(&self, exit_code: Option<i32>) {
        let mut state = self.lock();
        state.writer.close(exit_code);
        state.slots.clear();
    }

    /// Closes the log and waits for every delivery thread to finish.
    pub fn shutdown(&self) {
        let threads = {
            let mut state = self.lock();
            state.writer.close(None);
            state.slots.clear();
            std::mem::take(&mut state.threads)
        };
        for handle in threads {
            if handle.join().is_err() {
                tracing::warn!(id = %self.id, "log sink panicked");
            }
        }
    }
}

fn deliver(
    mut sink: Box<dyn LogSink>,
    backlog: Vec<Arc<LogLine>>,
    rx: Option<Receiver<Arc<LogLine>>>,
) {
    for line in &backlog {
        sink.accept(line);
    }
    drop(backlog);
    if let Some(rx) = rx {
        for line in rx {
            sink.accept(&line);
        }
    }
    sink.finish();
}
