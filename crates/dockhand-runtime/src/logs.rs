//! Container log decoding and the append-only line log.
//!
//! A started container gets one [`LogWriter`], owned by the pump thread,
//! and any number of [`LogReader`]s. Lines are never modified or removed
//! once appended.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use dockhand_common::types::{LogLine, LogStream};

/// Splits a byte stream into UTF-8 lines.
///
/// Lines end at `\n`; a preceding `\r` is dropped. Invalid UTF-8 is
/// replaced with U+FFFD. A line never splits a multi-byte character
/// because `\n` cannot occur inside one.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.pending.extend_from_slice(&rest[..pos]);
            lines.push(decode(&self.pending));
            self.pending.clear();
            rest = &rest[pos + 1..];
        }
        self.pending.extend_from_slice(rest);
        lines
    }

    /// Flushes a trailing unterminated line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = decode(&self.pending);
        self.pending.clear();
        Some(line)
    }
}

fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[derive(Debug, Default)]
struct State {
    lines: Vec<Arc<LogLine>>,
    /// `Some(exit_code)` once the stream has closed.
    closed: Option<Option<i32>>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Creates an empty log and returns its single writer and a reader.
#[must_use]
pub fn log_buffer() -> (LogWriter, LogReader) {
    let shared = Arc::new(Shared::default());
    (
        LogWriter {
            shared: Arc::clone(&shared),
        },
        LogReader { shared },
    )
}

/// The single writer of a container log.
///
/// Dropping an open writer closes the log with an unknown exit code, so
/// readers never wait on a producer that has gone away.
#[derive(Debug)]
pub struct LogWriter {
    shared: Arc<Shared>,
}

impl LogWriter {
    /// Appends a line and wakes waiting readers.
    ///
    /// Returns `None` once the log has been closed.
    pub fn append(&mut self, stream: LogStream, text: String) -> Option<Arc<LogLine>> {
        let mut state = self.shared.lock();
        if state.closed.is_some() {
            return None;
        }
        let seq = state.lines.len() as u64;
        let line = Arc::new(LogLine::new(seq, stream, text));
        state.lines.push(Arc::clone(&line));
        drop(state);
        self.shared.changed.notify_all();
        Some(line)
    }

    /// Marks the end of output. Later calls are ignored.
    pub fn close(&mut self, exit_code: Option<i32>) {
        let mut state = self.shared.lock();
        if state.closed.is_none() {
            state.closed = Some(exit_code);
            drop(state);
            self.shared.changed.notify_all();
        }
    }

    /// Returns a reader over this log.
    #[must_use]
    pub fn reader(&self) -> LogReader {
        LogReader {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        self.close(None);
    }
}

/// Outcome of waiting for the line after a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextLine {
    /// The line at the cursor.
    Line(Arc<LogLine>),
    /// The cursor is at the end and the log has closed.
    Closed {
        /// Exit code reported when the log closed.
        exit_code: Option<i32>,
    },
    /// The deadline passed with nothing new.
    Pending,
}

/// A cloneable, read-only view of a container log.
#[derive(Debug, Clone)]
pub struct LogReader {
    shared: Arc<Shared>,
}

impl LogReader {
    /// Number of lines appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().lines.len()
    }

    /// Returns whether no line has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the line at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Arc<LogLine>> {
        self.shared.lock().lines.get(index).cloned()
    }

    /// Returns every line appended so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<LogLine>> {
        self.shared.lock().lines.clone()
    }

    /// Returns the text of the last `n` lines, oldest first.
    #[must_use]
    pub fn tail(&self, n: usize) -> Vec<String> {
        let state = self.shared.lock();
        let start = state.lines.len().saturating_sub(n);
        state.lines[start..].iter().map(|l| l.text.clone()).collect()
    }

    /// Returns whether the log has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed.is_some()
    }

    /// Returns the exit code once the log has closed.
    #[must_use]
    pub fn exit_code(&self) -> Option<Option<i32>> {
        self.shared.lock().closed
    }

    /// Waits until the line at `cursor` exists, the log closes, or
    /// `deadline` passes.
    ///
    /// Lines are always returned before `Closed`, so a reader that
    /// advances its cursor sees every line.
    #[must_use]
    pub fn next(&self, cursor: usize, deadline: Instant) -> NextLine {
        let mut state = self.shared.lock();
        loop {
            if let Some(line) = state.lines.get(cursor) {
                return NextLine::Line(Arc::clone(line));
            }
            if let Some(exit_code) = state.closed {
                return NextLine::Closed { exit_code };
            }
            let now = Instant::now();
            if now >= deadline {
                return NextLine::Pending;
            }
            state = self
                .shared
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Blocks until the log closes or `deadline` passes; returns whether it closed.
    #[must_use]
    pub fn wait_closed(&self, deadline: Instant) -> bool {
        let mut state = self.shared.lock();
        loop {
            if state.closed.is_some() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .shared
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
