//! `dockhand run`: Start a container and wait until it is ready.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Args;
use dockhand_common::config::HarnessConfig;
use dockhand_common::types::LogLine;
use dockhand_runtime::wait::LogMessage;
use dockhand_runtime::{CancellationToken, ContainerHarness, ReadinessPredicate, WaitFor};
use dockhand_sdk::ContainerBuilder;

use crate::output::{self, BOLD, DIM, GREEN, RESET, YELLOW};

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Image reference, e.g. `example/example-java-app:1.0`.
    pub image: String,

    /// Command passed to the image entrypoint.
    #[arg(last = true)]
    pub command: Vec<String>,

    /// Ready once a line equals this text.
    #[arg(long, group = "wait")]
    pub wait_line: Option<String>,

    /// Ready once a line contains this text.
    #[arg(long, group = "wait")]
    pub wait_contains: Option<String>,

    /// Ready once a line matches this regular expression.
    #[arg(long, group = "wait")]
    pub wait_regex: Option<String>,

    /// Number of matching lines required.
    #[arg(long, default_value_t = 1)]
    pub times: usize,

    /// Readiness timeout, e.g. `30s`, `500ms`, `2m`. Defaults to the
    /// configured startup timeout.
    #[arg(long, value_parser = output::parse_duration)]
    pub timeout: Option<Duration>,

    /// Environment variable for the container, as KEY=VALUE.
    #[arg(short, long, value_parser = output::parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Container name.
    #[arg(long)]
    pub name: Option<String>,

    /// Also append container output to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Keep the container running after it is ready, until Ctrl+C or exit.
    #[arg(long)]
    pub hold: bool,
}

impl RunArgs {
    fn predicate(&self) -> anyhow::Result<Option<LogMessage>> {
        let predicate = if let Some(line) = &self.wait_line {
            WaitFor::log_line(line.as_str())
        } else if let Some(needle) = &self.wait_contains {
            WaitFor::contains(needle.as_str())
        } else if let Some(pattern) = &self.wait_regex {
            WaitFor::regex(pattern)?
        } else {
            return Ok(None);
        };
        Ok(Some(predicate.times(self.times)))
    }
}

/// Executes the `run` command.
///
/// # Errors
///
/// Returns an error if the container cannot be started or does not become
/// ready.
pub fn execute(args: RunArgs, config: HarnessConfig) -> anyhow::Result<()> {
    let started = Instant::now();
    let harness = ContainerHarness::new(config).context("connecting to the runtime")?;

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    let mut builder = ContainerBuilder::new(args.image.as_str())
        .command(args.command.iter().cloned())
        .cancel_token(token.clone())
        .log_consumer(|line: &LogLine| println!("{line}"));
    for (key, value) in &args.env {
        builder = builder.env(key.as_str(), value.as_str());
    }
    if let Some(name) = &args.name {
        builder = builder.name(name.as_str());
    }
    if let Some(path) = &args.log_file {
        builder = builder.log_file(path);
    }
    if let Some(timeout) = args.timeout {
        builder = builder.startup_timeout(timeout);
    }
    let predicate = args.predicate()?;
    let condition = predicate.as_ref().map(ReadinessPredicate::describe);
    if let Some(predicate) = predicate {
        builder = builder.wait_for(predicate);
    }

    eprintln!(
        "  {DIM}starting {} on {}{RESET}",
        args.image,
        harness.runtime_name()
    );
    let container = builder
        .start(&harness)
        .with_context(|| format!("running {}", args.image))?;

    match condition {
        Some(condition) => eprintln!(
            "  {GREEN}{BOLD}ready{RESET} {} {DIM}({condition}, {}){RESET}",
            container.id().short(),
            output::format_elapsed(started.elapsed())
        ),
        None => eprintln!(
            "  {GREEN}{BOLD}started{RESET} {}",
            container.id().short()
        ),
    }

    if args.hold {
        eprintln!("  Press {BOLD}Ctrl+C{RESET} to stop the container...");
        let logs = container.logs();
        while !token.is_cancelled() {
            if logs.wait_closed(Instant::now() + Duration::from_millis(250)) {
                eprintln!("  {YELLOW}container exited{RESET}");
                break;
            }
        }
    }

    let dropped = container.dropped_lines();
    if dropped > 0 {
        eprintln!("  {YELLOW}{dropped} log line(s) dropped{RESET}");
    }
    drop(container);
    eprintln!("  {DIM}container removed{RESET}");
    Ok(())
}
