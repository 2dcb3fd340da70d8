//! Moves container output into the log.
//!
//! One reader thread per output stream decodes bytes into lines and hands
//! them to the pump thread, the only writer of the container log. When
//! every stream has reached end of file the pump collects the exit code and
//! closes the log.

use std::io::{ErrorKind, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;

use dockhand_common::constants::{APP_NAME, READ_CHUNK_SIZE};
use dockhand_common::error::{DockhandError, Result};
use dockhand_common::types::{ContainerId, LogStream};

use crate::backend::{AttachedOutput, OutputReader};
use crate::logs::LineDecoder;
use crate::sink::LogDispatcher;

/// Starts streaming `output` into `dispatcher`.
///
/// # Errors
///
/// Returns an error if a thread cannot be spawned.
pub fn spawn(
    id: &ContainerId,
    output: AttachedOutput,
    dispatcher: Arc<LogDispatcher>,
) -> Result<JoinHandle<()>> {
    let AttachedOutput {
        stdout,
        stderr,
        exit,
    } = output;
    let (tx, rx) = mpsc::channel();

    let mut readers = vec![spawn_reader(id, LogStream::Stdout, stdout, tx.clone())?];
    if let Some(stderr) = stderr {
        readers.push(spawn_reader(id, LogStream::Stderr, stderr, tx.clone())?);
    }
    drop(tx);

    let pump_id = id.clone();
    std::thread::Builder::new()
        .name(format!("{APP_NAME}-pump-{}", id.short()))
        .spawn(move || {
            let mut lines = 0_u64;
            for (stream, text) in rx {
                tracing::trace!(id = %pump_id, %stream, line = %text, "container output");
                dispatcher.publish(stream, text);
                lines += 1;
            }
            for reader in readers {
                if reader.join().is_err() {
                    tracing::warn!(id = %pump_id, "output reader panicked");
                }
            }
            let exit_code = exit();
            tracing::info!(id = %pump_id, ?exit_code, lines, "container output ended");
            dispatcher.close(exit_code);
        })
        .map_err(|e| spawn_error("pump thread", e))
}

fn spawn_reader(
    id: &ContainerId,
    stream: LogStream,
    mut source: OutputReader,
    tx: Sender<(LogStream, String)>,
) -> Result<JoinHandle<()>> {
    let reader_id = id.clone();
    std::thread::Builder::new()
        .name(format!("{APP_NAME}-{stream}-{}", id.short()))
        .spawn(move || {
            let mut decoder = LineDecoder::new();
            let mut buf = vec![0_u8; READ_CHUNK_SIZE];
            loop {
                match source.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        for line in decoder.push(&buf[..n]) {
                            if tx.send((stream, line)).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => {
                        tracing::warn!(id = %reader_id, %stream, error = %e, "output read failed");
                        break;
                    }
                }
            }
            if let Some(line) = decoder.finish() {
                let _ = tx.send((stream, line));
            }
        })
        .map_err(|e| spawn_error("output reader thread", e))
}

fn spawn_error(what: &str, source: std::io::Error) -> DockhandError {
    DockhandError::Io {
        path: PathBuf::from(what),
        source,
    }
}
