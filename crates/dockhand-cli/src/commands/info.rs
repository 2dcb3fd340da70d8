//! `dockhand info`: Show runtime backend availability.

use clap::Args;
use dockhand_common::config::HarnessConfig;
use dockhand_runtime::backend::probe_runtimes;

use crate::output::status_marker;

/// Arguments for the `info` command.
#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `info` command.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn execute(args: &InfoArgs, config: &HarnessConfig) -> anyhow::Result<()> {
    let runtimes = probe_runtimes(config);

    if args.json {
        let entries: Vec<_> = runtimes
            .iter()
            .map(|r| {
                serde_json::json!({
                    "runtime": r.kind.to_string(),
                    "binary": r.binary.as_ref().map(|b| b.display().to_string()),
                    "available": r.available,
                })
            })
            .collect();
        let value = serde_json::json!({
            "selected": config.runtime.to_string(),
            "registry": config.registry,
            "runtimes": entries,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Selected runtime: {}", config.runtime);
    if let Some(registry) = &config.registry {
        println!("Registry:         {registry}");
    }
    println!();
    println!("{:<3} {:<10} {:<40}", "", "RUNTIME", "BINARY");
    for r in &runtimes {
        println!(
            "{:<3} {:<10} {:<40}",
            status_marker(r.available),
            r.kind,
            r.binary
                .as_ref()
                .map_or_else(|| "-".to_string(), |b| b.display().to_string())
        );
    }
    Ok(())
}
