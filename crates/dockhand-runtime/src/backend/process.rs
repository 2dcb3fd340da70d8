//! Host-process backend.
//!
//! The "image" is an executable found on `PATH` (or given as a path) and the
//! container command becomes its arguments. Each process is started in its
//! own process group so a stop reaches every descendant holding the output
//! pipes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dockhand_common::error::{DockhandError, Result};
use dockhand_common::types::{ContainerId, ImageReference};

use super::{AttachedOutput, ContainerConfig, ContainerRuntime, ImageProvider, ResolvedImage};

/// Resolves image names to host executables.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessImageProvider;

impl ImageProvider for ProcessImageProvider {
    fn resolve(&self, reference: &ImageReference) -> Result<ResolvedImage> {
        let name = reference.name();
        let path = if name.contains('/') {
            PathBuf::from(name)
        } else {
            which::which(name).map_err(|e| DockhandError::ImageResolution {
                reference: reference.to_string(),
                reason: e.to_string(),
            })?
        };
        if !path.is_file() {
            return Err(DockhandError::ImageResolution {
                reference: reference.to_string(),
                reason: format!("{} is not an executable file", path.display()),
            });
        }
        tracing::debug!(image = %reference, path = %path.display(), "resolved host executable");
        Ok(ResolvedImage {
            reference: reference.clone(),
            id: path.display().to_string(),
        })
    }
}

#[derive(Debug)]
struct ProcessEntry {
    program: PathBuf,
    config: ContainerConfig,
    pid: Option<u32>,
    exited: Arc<AtomicBool>,
}

/// Runs containers as host processes.
#[derive(Debug, Default)]
pub struct ProcessRuntime {
    entries: Mutex<HashMap<ContainerId, ProcessEntry>>,
}

impl ProcessRuntime {
    /// Creates a runtime with no tracked processes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<ContainerId, ProcessEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ContainerRuntime for ProcessRuntime {
    fn name(&self) -> &'static str {
        "process"
    }

    fn create(&self, image: &ResolvedImage, config: &ContainerConfig) -> Result<ContainerId> {
        let id = ContainerId::generate();
        tracing::info!(id = %id, program = %image.id, "creating host process container");
        let _ = self.entries().insert(
            id.clone(),
            ProcessEntry {
                program: PathBuf::from(&image.id),
                config: config.clone(),
                pid: None,
                exited: Arc::new(AtomicBool::new(false)),
            },
        );
        Ok(id)
    }

    fn start(&self, id: &ContainerId) -> Result<AttachedOutput> {
        let mut entries = self.entries();
        let entry = entries.get_mut(id).ok_or_else(|| DockhandError::NotFound {
            kind: "container",
            id: id.to_string(),
        })?;
        if entry.pid.is_some() {
            return Err(DockhandError::Start {
                id: id.to_string(),
                reason: "process was already started".into(),
            });
        }

        let mut command = Command::new(&entry.program);
        let _ = command
            .args(&entry.config.command)
            .envs(entry.config.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &entry.config.working_dir {
            let _ = command.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            let _ = command.process_group(0);
        }

        let mut child = command.spawn().map_err(|e| DockhandError::Start {
            id: id.to_string(),
            reason: format!("cannot launch {}: {e}", entry.program.display()),
        })?;
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill();
            return Err(DockhandError::Start {
                id: id.to_string(),
                reason: "output pipes were not captured".into(),
            });
        };

        let pid = child.id();
        entry.pid = Some(pid);
        let exited = Arc::clone(&entry.exited);
        tracing::info!(id = %id, pid, "host process started");

        let exit = Box::new(move || {
            let status = child.wait().ok();
            exited.store(true, Ordering::Release);
            status.and_then(exit_code)
        });

        Ok(AttachedOutput {
            stdout: Box::new(stdout),
            stderr: Some(Box::new(stderr)),
            exit,
        })
    }

    fn stop(&self, id: &ContainerId, grace: Duration) -> Result<()> {
        let (pid, exited) = {
            let entries = self.entries();
            let Some(entry) = entries.get(id) else {
                return Ok(());
            };
            (entry.pid, Arc::clone(&entry.exited))
        };
        let Some(pid) = pid else {
            return Ok(());
        };
        if exited.load(Ordering::Acquire) {
            return Ok(());
        }
        terminate(pid, grace, &exited)
    }

    fn remove(&self, id: &ContainerId) -> Result<()> {
        if self.entries().remove(id).is_some() {
            tracing::debug!(id = %id, "host process container removed");
        }
        Ok(())
    }

    fn is_available(&self) -> bool {
        cfg!(unix)
    }
}

/// Poll interval while waiting for a signalled process group to exit.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Sends SIGTERM to the process group, then SIGKILL once `grace` elapses.
#[cfg(unix)]
fn terminate(pid: u32, grace: Duration, exited: &AtomicBool) -> Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| DockhandError::Config {
        message: format!("PID value {pid} exceeds i32 range"),
    })?;
    let group = Pid::from_raw(raw);

    if killpg(group, Signal::SIGTERM).is_err() {
        return Ok(());
    }
    tracing::info!(pid, "sent SIGTERM");

    let deadline = std::time::Instant::now() + grace;
    while std::time::Instant::now() < deadline {
        if exited.load(Ordering::Acquire) {
            return Ok(());
        }
        std::thread::sleep(STOP_POLL_INTERVAL);
    }

    if !exited.load(Ordering::Acquire) && killpg(group, Signal::SIGKILL).is_ok() {
        tracing::info!(pid, "sent SIGKILL");
    }
    Ok(())
}

#[cfg(not(unix))]
fn terminate(pid: u32, _grace: Duration, _exited: &AtomicBool) -> Result<()> {
    Err(DockhandError::Config {
        message: format!("stopping host process {pid} requires a Unix platform"),
    })
}

/// Maps an exit status to a shell-style code (`128 + signal` when killed).
#[cfg(unix)]
fn exit_code(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.code().or_else(|| status.signal().map(|s| 128 + s))
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> Option<i32> {
    status.code()
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::Read;

    use super::*;

    fn sh() -> ResolvedImage {
        ProcessImageProvider
            .resolve(&ImageReference::parse("sh").unwrap())
            .unwrap()
    }

    #[test]
    fn resolves_executables_on_path() {
        let image = sh();
        assert!(image.id.ends_with("/sh"));
        assert_eq!(image.reference.name(), "sh");
    }

    #[test]
    fn unknown_executable_fails_resolution() {
        let reference = ImageReference::parse("dockhand-no-such-program").unwrap();
        let err = ProcessImageProvider.resolve(&reference).unwrap_err();
        assert!(matches!(err, DockhandError::ImageResolution { .. }));
    }

    #[test]
    fn started_process_streams_stdout_and_reports_exit() {
        let runtime = ProcessRuntime::new();
        let config = ContainerConfig {
            command: vec!["-c".into(), "echo \"$GREETING\"; exit 3".into()],
            env: vec![("GREETING".into(), "hello".into())],
            ..ContainerConfig::default()
        };
        let id = runtime.create(&sh(), &config).unwrap();
        let mut output = runtime.start(&id).unwrap();

        let mut text = String::new();
        let _ = output.stdout.read_to_string(&mut text).unwrap();
        assert_eq!(text, "hello\n");
        assert_eq!((output.exit)(), Some(3));

        runtime.stop(&id, Duration::from_millis(100)).unwrap();
        runtime.remove(&id).unwrap();
    }

    #[test]
    fn starting_twice_is_refused() {
        let runtime = ProcessRuntime::new();
        let config = ContainerConfig {
            command: vec!["-c".into(), "true".into()],
            ..ContainerConfig::default()
        };
        let id = runtime.create(&sh(), &config).unwrap();
        let output = runtime.start(&id).unwrap();
        assert!(matches!(runtime.start(&id), Err(DockhandError::Start { .. })));
        let _ = (output.exit)();
    }

    #[test]
    fn stop_terminates_the_process_group() {
        let runtime = ProcessRuntime::new();
        let config = ContainerConfig {
            command: vec!["-c".into(), "sleep 30 & wait".into()],
            ..ContainerConfig::default()
        };
        let id = runtime.create(&sh(), &config).unwrap();
        let mut output = runtime.start(&id).unwrap();

        let stopper = std::thread::spawn({
            let id = id.clone();
            move || {
                runtime.stop(&id, Duration::from_secs(2)).unwrap();
                runtime
            }
        });
        let mut sink = Vec::new();
        let _ = output.stdout.read_to_end(&mut sink).unwrap();
        let code = (output.exit)();
        assert_eq!(code, Some(128 + 15));
        let runtime = stopper.join().unwrap();
        runtime.remove(&id).unwrap();
    }

    #[test]
    fn stop_and_remove_unknown_ids_are_noops() {
        let runtime = ProcessRuntime::new();
        let id = ContainerId::new("missing");
        runtime.stop(&id, Duration::ZERO).unwrap();
        runtime.remove(&id).unwrap();
    }
}
