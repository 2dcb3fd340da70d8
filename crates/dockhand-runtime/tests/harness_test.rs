//! Lifecycle tests for the harness against a scripted in-memory runtime.
//!
//! The scripted runtime plays back a fixed sequence of output lines,
//! pauses, and exits on a background thread, so every readiness outcome
//! can be produced without a container engine.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::cast_possible_truncation)]

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use dockhand_common::config::{HarnessConfig, OverflowPolicy};
use dockhand_common::error::{DockhandError, Result};
use dockhand_common::types::{ContainerId, ContainerState, ImageReference, LogLine, LogStream};
use dockhand_runtime::backend::{
    AttachedOutput, Backend, ContainerConfig, ContainerRuntime, ImageProvider, ResolvedImage,
};
use dockhand_runtime::{CancellationToken, ContainerHandle, ContainerHarness, WaitFor};

// ── Scripted runtime ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Step {
    Out(&'static str),
    Err(&'static str),
    Numbered(&'static str, usize),
    Sleep(u64),
    Exit(i32),
    Hang,
}

struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.pending = chunk,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        let _ = self.pending.drain(..n);
        Ok(n)
    }
}

fn reader() -> (Sender<Vec<u8>>, ChannelReader) {
    let (tx, rx) = channel();
    (
        tx,
        ChannelReader {
            rx,
            pending: Vec::new(),
        },
    )
}

#[derive(Default)]
struct Scripted {
    script: Vec<Step>,
    fail_start: bool,
    stopped: Arc<AtomicBool>,
    calls: Mutex<Vec<String>>,
}

impl Scripted {
    fn new(script: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script,
            ..Self::default()
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

fn play(
    script: Vec<Step>,
    stopped: &AtomicBool,
    out: &Sender<Vec<u8>>,
    err: &Sender<Vec<u8>>,
) -> Option<i32> {
    for step in script {
        if stopped.load(Ordering::SeqCst) {
            return Some(143);
        }
        match step {
            Step::Out(line) => {
                let _ = out.send(format!("{line}\n").into_bytes());
            }
            Step::Err(line) => {
                let _ = err.send(format!("{line}\n").into_bytes());
            }
            Step::Numbered(prefix, count) => {
                for i in 0..count {
                    let _ = out.send(format!("{prefix} {i}\n").into_bytes());
                }
            }
            Step::Sleep(ms) => std::thread::sleep(Duration::from_millis(ms)),
            Step::Exit(code) => return Some(code),
            Step::Hang => {
                while !stopped.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(5));
                }
                return Some(143);
            }
        }
    }
    Some(0)
}

impl ContainerRuntime for Scripted {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn create(&self, _image: &ResolvedImage, _config: &ContainerConfig) -> Result<ContainerId> {
        self.record("create");
        Ok(ContainerId::generate())
    }

    fn start(&self, id: &ContainerId) -> Result<AttachedOutput> {
        self.record("start");
        if self.fail_start {
            return Err(DockhandError::Start {
                id: id.to_string(),
                reason: "entrypoint not found".into(),
            });
        }
        let (out_tx, out) = reader();
        let (err_tx, err) = reader();
        let script = self.script.clone();
        let stopped = Arc::clone(&self.stopped);
        let producer: JoinHandle<Option<i32>> =
            std::thread::spawn(move || play(script, &stopped, &out_tx, &err_tx));
        Ok(AttachedOutput {
            stdout: Box::new(out),
            stderr: Some(Box::new(err)),
            exit: Box::new(move || producer.join().ok().flatten()),
        })
    }

    fn stop(&self, _id: &ContainerId, _grace: Duration) -> Result<()> {
        self.record("stop");
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, _id: &ContainerId) -> Result<()> {
        self.record("remove");
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }
}

struct Images {
    known: &'static str,
}

impl ImageProvider for Images {
    fn resolve(&self, reference: &ImageReference) -> Result<ResolvedImage> {
        if reference.name() == self.known {
            Ok(ResolvedImage {
                reference: reference.clone(),
                id: format!("sha256:{}", self.known.len()),
            })
        } else {
            Err(DockhandError::ImageResolution {
                reference: reference.to_string(),
                reason: "not found".into(),
            })
        }
    }
}

const IMAGE: &str = "example/example-java-app";

fn harness_with(runtime: Arc<Scripted>, config: HarnessConfig) -> ContainerHarness {
    let backend = Backend::new(Arc::new(Images { known: IMAGE }), runtime);
    ContainerHarness::with_backend(config, backend).unwrap()
}

fn harness(runtime: Arc<Scripted>) -> ContainerHarness {
    harness_with(runtime, HarnessConfig::default())
}

fn started(harness: &ContainerHarness) -> ContainerHandle {
    let mut handle = harness
        .create(&ImageReference::parse(IMAGE).unwrap(), &ContainerConfig::default())
        .unwrap();
    handle.start().unwrap();
    handle
}

fn collector() -> (impl FnMut(&LogLine) + Send + 'static, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = Arc::clone(&seen);
    (
        move |line: &LogLine| sink_seen.lock().unwrap().push(line.text.clone()),
        seen,
    )
}

// ── Create / start ───────────────────────────────────────────────────

#[test]
fn create_then_start_reaches_running() {
    let runtime = Scripted::new(vec![Step::Hang]);
    let h = harness(Arc::clone(&runtime));
    let mut handle = h
        .create(&ImageReference::parse(IMAGE).unwrap(), &ContainerConfig::default())
        .unwrap();
    assert_eq!(handle.state(), ContainerState::Created);
    assert_eq!(handle.image().reference.tag(), Some("latest"));
    handle.start().unwrap();
    assert_eq!(handle.state(), ContainerState::Running);
}

#[test]
fn unknown_image_fails_resolution() {
    let h = harness(Scripted::new(vec![]));
    let err = h
        .create(
            &ImageReference::parse("example/missing").unwrap(),
            &ContainerConfig::default(),
        )
        .unwrap_err();
    assert!(matches!(err, DockhandError::ImageResolution { .. }));
}

#[test]
fn launch_failure_is_start_error_and_release_is_safe() {
    let runtime = Arc::new(Scripted {
        fail_start: true,
        ..Scripted::default()
    });
    let h = harness(Arc::clone(&runtime));
    let mut handle = h
        .create(&ImageReference::parse(IMAGE).unwrap(), &ContainerConfig::default())
        .unwrap();
    let err = handle.start().unwrap_err();
    assert!(matches!(err, DockhandError::Start { .. }));
    assert_eq!(handle.state(), ContainerState::Created);
    handle.release();
    assert_eq!(handle.state(), ContainerState::Released);
    assert_eq!(runtime.calls(), vec!["create", "start", "remove"]);
}

// ── Readiness ────────────────────────────────────────────────────────

#[test]
fn exact_line_makes_container_ready() {
    let runtime = Scripted::new(vec![
        Step::Out("Starting application"),
        Step::Sleep(30),
        Step::Out("Hello World!"),
        Step::Hang,
    ]);
    let h = harness(runtime);
    let mut handle = started(&h);
    handle
        .wait_for(
            WaitFor::log_line("Hello World!\n"),
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(handle.state(), ContainerState::Ready);
}

#[test]
fn timeout_is_never_reported_early() {
    let runtime = Scripted::new(vec![Step::Out("still booting"), Step::Hang]);
    let h = harness(runtime);
    let mut handle = started(&h);
    let timeout = Duration::from_millis(200);
    let begun = Instant::now();
    let err = handle
        .wait_for(WaitFor::log_line("never"), timeout, &CancellationToken::new())
        .unwrap_err();
    assert!(begun.elapsed() >= timeout);
    match err {
        DockhandError::ReadinessTimeout { tail, .. } => assert_eq!(tail, vec!["still booting"]),
        other => panic!("expected timeout, got {other}"),
    }
    assert_eq!(handle.state(), ContainerState::Running);
}

#[test]
fn exit_before_match_reports_code_and_tail() {
    let runtime = Scripted::new(vec![Step::Out("loading"), Step::Err("fatal: no config"), Step::Exit(2)]);
    let h = harness(runtime);
    let mut handle = started(&h);
    let err = handle
        .wait_for(
            WaitFor::log_line("Hello World!"),
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .unwrap_err();
    match err {
        DockhandError::ContainerExited { exit_code, tail, .. } => {
            assert_eq!(exit_code, Some(2));
            assert!(tail.contains(&"fatal: no config".to_string()));
        }
        other => panic!("expected exit, got {other}"),
    }
}

#[test]
fn lines_written_before_exit_are_evaluated_first() {
    let runtime = Scripted::new(vec![Step::Out("Hello World!"), Step::Exit(0)]);
    let h = harness(runtime);
    let mut handle = started(&h);
    assert!(handle.logs().wait_closed(Instant::now() + Duration::from_secs(5)));
    handle
        .wait_for(
            WaitFor::log_line("Hello World!"),
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(handle.state(), ContainerState::Ready);
    assert_eq!(handle.exit_code(), Some(0));
}

#[test]
fn times_waits_for_repeated_lines() {
    let runtime = Scripted::new(vec![
        Step::Out("tick"),
        Step::Out("tick"),
        Step::Sleep(20),
        Step::Out("tick"),
        Step::Hang,
    ]);
    let h = harness(runtime);
    let mut handle = started(&h);
    let mut predicate = WaitFor::contains("tick").times(3);
    handle
        .wait_for(&mut predicate, Duration::from_secs(10), &CancellationToken::new())
        .unwrap();
    assert_eq!(predicate.matched(), 3);
}

#[test]
fn stderr_lines_can_satisfy_a_stream_filtered_predicate() {
    let runtime = Scripted::new(vec![Step::Out("ready"), Step::Err("ready"), Step::Hang]);
    let h = harness(runtime);
    let mut handle = started(&h);
    handle
        .wait_for(
            WaitFor::log_line("ready").on_stream(LogStream::Stderr),
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .unwrap();
    assert!(handle.logs().snapshot().iter().any(|l| l.stream == LogStream::Stderr));
}

#[test]
fn waiting_again_on_a_ready_container_stays_ready() {
    let runtime = Scripted::new(vec![Step::Out("a"), Step::Out("b"), Step::Hang]);
    let h = harness(runtime);
    let mut handle = started(&h);
    let token = CancellationToken::new();
    handle
        .wait_for(WaitFor::log_line("b"), Duration::from_secs(10), &token)
        .unwrap();
    handle
        .wait_for(WaitFor::log_line("a"), Duration::from_secs(10), &token)
        .unwrap();
    assert_eq!(handle.state(), ContainerState::Ready);
}

// ── Cancellation ─────────────────────────────────────────────────────

#[test]
fn cancel_returns_promptly_and_cleanup_still_works() {
    let runtime = Scripted::new(vec![Step::Hang]);
    let h = harness(Arc::clone(&runtime));
    let mut handle = started(&h);
    let token = CancellationToken::new();
    let canceller = {
        let token = token.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            token.cancel();
        })
    };
    let begun = Instant::now();
    let err = handle
        .wait_for(WaitFor::log_line("never"), Duration::from_secs(60), &token)
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(begun.elapsed() < Duration::from_secs(5));
    canceller.join().unwrap();

    handle.stop().unwrap();
    assert_eq!(handle.state(), ContainerState::Stopped);
    handle.release();
    assert_eq!(handle.state(), ContainerState::Released);
    assert_eq!(runtime.calls(), vec!["create", "start", "stop", "remove"]);
}

// ── Log sinks ────────────────────────────────────────────────────────

#[test]
fn every_sink_sees_lines_in_production_order() {
    let h = harness(Scripted::new(vec![Step::Numbered("line", 200), Step::Exit(0)]));
    let mut handle = h
        .create(&ImageReference::parse(IMAGE).unwrap(), &ContainerConfig::default())
        .unwrap();
    let (first, seen_first) = collector();
    let (second, seen_second) = collector();
    handle.consume_logs(first).unwrap();
    handle.consume_logs(second).unwrap();
    handle.start().unwrap();
    assert!(handle.logs().wait_closed(Instant::now() + Duration::from_secs(10)));
    handle.release();

    let expected: Vec<String> = (0..200).map(|i| format!("line {i}")).collect();
    assert_eq!(*seen_first.lock().unwrap(), expected);
    assert_eq!(*seen_second.lock().unwrap(), expected);
}

#[test]
fn late_sink_starts_from_first_line() {
    let runtime = Scripted::new(vec![Step::Out("first"), Step::Out("second"), Step::Hang]);
    let h = harness(runtime);
    let mut handle = started(&h);
    handle
        .wait_for(WaitFor::log_line("second"), Duration::from_secs(10), &CancellationToken::new())
        .unwrap();
    let (sink, seen) = collector();
    handle.consume_logs(sink).unwrap();
    handle.release();
    assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
}

#[test]
fn drop_newest_counts_lines_a_slow_sink_missed() {
    let script = vec![Step::Numbered("spam", 50), Step::Exit(0)];
    let config = HarnessConfig {
        sink_buffer_capacity: 1,
        overflow_policy: OverflowPolicy::DropNewest,
        ..HarnessConfig::default()
    };
    let h = harness_with(Scripted::new(script), config);
    let mut handle = h
        .create(&ImageReference::parse(IMAGE).unwrap(), &ContainerConfig::default())
        .unwrap();
    let (gate_tx, gate_rx) = channel::<()>();
    let (inner, seen) = collector();
    let mut inner = inner;
    handle
        .consume_logs(move |line: &LogLine| {
            let _ = gate_rx.recv();
            inner(line);
        })
        .unwrap();
    handle.start().unwrap();
    assert!(handle.logs().wait_closed(Instant::now() + Duration::from_secs(10)));
    assert_eq!(handle.logs().len(), 50);

    let dropped = handle.dropped_lines();
    drop(gate_tx);
    handle.release();
    assert!(dropped > 0);
    assert_eq!(seen.lock().unwrap().len() as u64 + dropped, 50);
}

// ── Release ──────────────────────────────────────────────────────────

#[test]
fn release_is_idempotent() {
    let runtime = Scripted::new(vec![Step::Hang]);
    let h = harness(Arc::clone(&runtime));
    let mut handle = started(&h);
    handle.release();
    handle.release();
    handle.stop().unwrap();
    assert_eq!(handle.state(), ContainerState::Released);
    assert_eq!(runtime.calls(), vec!["create", "start", "stop", "remove"]);
}

#[test]
fn release_without_start_never_stops() {
    let runtime = Scripted::new(vec![]);
    let h = harness(Arc::clone(&runtime));
    let mut handle = h
        .create(&ImageReference::parse(IMAGE).unwrap(), &ContainerConfig::default())
        .unwrap();
    handle.release();
    assert_eq!(runtime.calls(), vec!["create", "remove"]);
}

#[test]
fn panic_unwinding_through_caller_releases_container() {
    let runtime = Scripted::new(vec![Step::Hang]);
    let h = harness(Arc::clone(&runtime));
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _handle = started(&h);
        panic!("assertion failed in test body");
    }));
    assert!(outcome.is_err());
    assert_eq!(runtime.calls(), vec!["create", "start", "stop", "remove"]);
}
