//! CLI command definitions and dispatch.

pub mod info;
pub mod resolve;
pub mod run;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dockhand_common::config::{HarnessConfig, RuntimeKind};

/// Dockhand: start containers, wait until they are ready, clean them up.
#[derive(Parser, Debug)]
#[command(name = dockhand_common::constants::BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path to a JSON configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Runtime backend: auto, docker, podman or process.
    #[arg(long, global = true)]
    pub runtime: Option<RuntimeKind>,

    /// Emit diagnostics as JSON lines on stderr.
    #[arg(long, global = true)]
    pub json_logs: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a container and wait until it is ready.
    Run(run::RunArgs),
    /// Resolve an image reference to a launchable image.
    Resolve(resolve::ResolveArgs),
    /// Show which runtime backends are available on this host.
    Info(info::InfoArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the command fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref(), cli.runtime)?;
    match cli.command {
        Command::Run(args) => run::execute(args, config),
        Command::Resolve(args) => resolve::execute(&args, config),
        Command::Info(args) => info::execute(&args, &config),
    }
}

/// Builds the configuration: file, then environment, then flags.
fn load_config(
    path: Option<&std::path::Path>,
    runtime: Option<RuntimeKind>,
) -> anyhow::Result<HarnessConfig> {
    let config = match path {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => HarnessConfig::default(),
    };
    let mut config = config
        .apply_env()
        .context("applying environment overrides")?;
    if let Some(runtime) = runtime {
        config.runtime = runtime;
    }
    tracing::debug!(?config, "configuration loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_parses_wait_flags_and_trailing_command() {
        let cli = Cli::try_parse_from([
            "dockhand",
            "--runtime",
            "process",
            "run",
            "sh",
            "--wait-line",
            "Hello World!",
            "--times",
            "2",
            "--timeout",
            "10s",
            "--env",
            "A=1",
            "--",
            "-c",
            "echo hi",
        ])
        .unwrap();
        assert_eq!(cli.runtime, Some(RuntimeKind::Process));
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.image, "sh");
        assert_eq!(args.wait_line.as_deref(), Some("Hello World!"));
        assert_eq!(args.times, 2);
        assert_eq!(args.timeout, Some(std::time::Duration::from_secs(10)));
        assert_eq!(args.env, vec![("A".to_string(), "1".to_string())]);
        assert_eq!(args.command, vec!["-c", "echo hi"]);
    }

    #[test]
    fn wait_flags_are_mutually_exclusive() {
        let result = Cli::try_parse_from([
            "dockhand",
            "run",
            "app",
            "--wait-line",
            "a",
            "--wait-contains",
            "b",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_runtime_is_rejected() {
        assert!(Cli::try_parse_from(["dockhand", "--runtime", "lxc", "info"]).is_err());
    }

    #[test]
    fn config_file_is_loaded_and_flag_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dockhand.json");
        std::fs::write(&path, r#"{ "runtime": "docker", "startup_timeout_ms": 1500 }"#).unwrap();
        let config = load_config(Some(&path), Some(RuntimeKind::Process)).unwrap();
        assert_eq!(config.runtime, RuntimeKind::Process);
        assert_eq!(config.startup_timeout_ms, 1500);
    }
}
