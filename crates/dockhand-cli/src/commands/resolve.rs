//! `dockhand resolve`: Resolve an image reference.

use anyhow::Context;
use clap::Args;
use dockhand_common::config::HarnessConfig;
use dockhand_common::types::ImageReference;
use dockhand_runtime::ContainerHarness;

/// Arguments for the `resolve` command.
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Image reference to resolve.
    pub image: String,

    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `resolve` command.
///
/// Applies registry redirection and the pull policy, then prints the
/// resolved reference and image id.
///
/// # Errors
///
/// Returns an error if the reference is malformed or cannot be resolved.
pub fn execute(args: &ResolveArgs, config: HarnessConfig) -> anyhow::Result<()> {
    let reference: ImageReference = args.image.parse()?;
    let harness = ContainerHarness::new(config).context("connecting to the runtime")?;
    let image = harness.resolve(&reference)?;

    if args.json {
        let value = serde_json::json!({
            "reference": image.reference.to_string(),
            "name": image.reference.name(),
            "tag": image.reference.tag(),
            "digest": image.reference.digest().map(ToString::to_string),
            "id": image.id,
            "runtime": harness.runtime_name(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{:<50} {}", image.reference, image.id);
    }
    Ok(())
}
