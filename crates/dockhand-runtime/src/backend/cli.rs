//! Backend driving the `docker` or `podman` command-line client.
//!
//! Both clients accept the same subset of commands used here, so one
//! implementation serves either. Output is attached with `logs --follow`,
//! which replays the container's output from its first line and ends when
//! the container stops.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use dockhand_common::config::{HarnessConfig, PullPolicy};
use dockhand_common::constants::MANAGED_LABEL;
use dockhand_common::error::{DockhandError, Result};
use dockhand_common::types::{ContainerId, ImageReference};

use super::{AttachedOutput, ContainerConfig, ContainerRuntime, ImageProvider, ResolvedImage};

/// A container CLI acting as both image provider and runtime.
#[derive(Debug, Clone)]
pub struct CliBackend {
    program: &'static str,
    binary: PathBuf,
    registry: Option<String>,
    pull_policy: PullPolicy,
}

impl CliBackend {
    /// Locates `program` on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::NotFound`] if the binary is not installed.
    pub fn locate(program: &'static str, config: &HarnessConfig) -> Result<Self> {
        let binary = which::which(program).map_err(|_| DockhandError::NotFound {
            kind: "container CLI",
            id: program.to_string(),
        })?;
        Ok(Self::with_binary(program, binary, config))
    }

    /// Uses an explicit binary path.
    #[must_use]
    pub fn with_binary(program: &'static str, binary: PathBuf, config: &HarnessConfig) -> Self {
        Self {
            program,
            binary,
            registry: config.registry.clone(),
            pull_policy: config.pull_policy,
        }
    }

    /// Returns the path of the client binary.
    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn run(&self, args: &[String]) -> Result<Output> {
        tracing::debug!(program = self.program, ?args, "running container CLI");
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| DockhandError::Io {
                path: self.binary.clone(),
                source: e,
            })
    }

    fn pull(&self, reference: &ImageReference) -> Result<()> {
        tracing::info!(image = %reference, "pulling image");
        let output = self.run(&["pull".into(), reference.to_string()])?;
        if output.status.success() {
            Ok(())
        } else {
            Err(DockhandError::ImageResolution {
                reference: reference.to_string(),
                reason: failure_reason(&output),
            })
        }
    }

    fn inspect_image(&self, reference: &ImageReference) -> Result<Option<String>> {
        let output = self.run(&["image".into(), "inspect".into(), reference.to_string()])?;
        if !output.status.success() {
            return Ok(None);
        }
        let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        Ok(parse_image_id(&json))
    }
}

impl ImageProvider for CliBackend {
    fn resolve(&self, reference: &ImageReference) -> Result<ResolvedImage> {
        let reference = match &self.registry {
            Some(registry) => reference.with_registry(registry),
            None => reference.clone(),
        };

        if self.pull_policy == PullPolicy::Always {
            self.pull(&reference)?;
        }
        let mut id = self.inspect_image(&reference)?;
        if id.is_none() && self.pull_policy == PullPolicy::Missing {
            self.pull(&reference)?;
            id = self.inspect_image(&reference)?;
        }

        let id = id.ok_or_else(|| DockhandError::ImageResolution {
            reference: reference.to_string(),
            reason: match self.pull_policy {
                PullPolicy::Never => "image not present locally and pulling is disabled".into(),
                _ => "image not present after pull".into(),
            },
        })?;
        tracing::info!(image = %reference, id = %id, "resolved image");
        Ok(ResolvedImage { reference, id })
    }
}

impl ContainerRuntime for CliBackend {
    fn name(&self) -> &'static str {
        self.program
    }

    fn create(&self, image: &ResolvedImage, config: &ContainerConfig) -> Result<ContainerId> {
        let output = self.run(&create_args(&image.id, config))?;
        if !output.status.success() {
            return Err(DockhandError::Start {
                id: config.name.clone().unwrap_or_else(|| image.reference.to_string()),
                reason: failure_reason(&output),
            });
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(DockhandError::Start {
                id: image.reference.to_string(),
                reason: format!("{} create printed no container id", self.program),
            });
        }
        Ok(ContainerId::new(id))
    }

    fn start(&self, id: &ContainerId) -> Result<AttachedOutput> {
        let output = self.run(&["start".into(), id.to_string()])?;
        if !output.status.success() {
            return Err(DockhandError::Start {
                id: id.to_string(),
                reason: failure_reason(&output),
            });
        }

        let mut child = Command::new(&self.binary)
            .args(["logs", "--follow", id.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DockhandError::Start {
                id: id.to_string(),
                reason: format!("cannot attach to output: {e}"),
            })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(DockhandError::Start {
                id: id.to_string(),
                reason: "output pipes were not captured".into(),
            });
        };

        let binary = self.binary.clone();
        let container = id.to_string();
        let exit = Box::new(move || {
            let _ = child.wait();
            let output = Command::new(&binary)
                .args(["wait", container.as_str()])
                .stdin(Stdio::null())
                .output()
                .ok()?;
            parse_exit_code(&String::from_utf8_lossy(&output.stdout))
        });

        Ok(AttachedOutput {
            stdout: Box::new(stdout),
            stderr: Some(Box::new(stderr)),
            exit,
        })
    }

    fn stop(&self, id: &ContainerId, grace: Duration) -> Result<()> {
        let output = self.run(&[
            "stop".into(),
            "--time".into(),
            grace.as_secs().to_string(),
            id.to_string(),
        ])?;
        if output.status.success() {
            Ok(())
        } else {
            Err(DockhandError::Config {
                message: format!("{} stop {id} failed: {}", self.program, failure_reason(&output)),
            })
        }
    }

    fn remove(&self, id: &ContainerId) -> Result<()> {
        let output = self.run(&[
            "rm".into(),
            "--force".into(),
            "--volumes".into(),
            id.to_string(),
        ])?;
        if output.status.success() {
            Ok(())
        } else {
            Err(DockhandError::Config {
                message: format!("{} rm {id} failed: {}", self.program, failure_reason(&output)),
            })
        }
    }

    fn is_available(&self) -> bool {
        self.run(&["version".into()])
            .is_ok_and(|output| output.status.success())
    }
}

/// Builds the argument list for `create`.
fn create_args(image_id: &str, config: &ContainerConfig) -> Vec<String> {
    let mut args = vec!["create".to_string(), "--label".into(), MANAGED_LABEL.into()];
    if let Some(name) = &config.name {
        args.extend(["--name".into(), name.clone()]);
    }
    for (key, value) in &config.labels {
        args.extend(["--label".into(), format!("{key}={value}")]);
    }
    for (key, value) in &config.env {
        args.extend(["--env".into(), format!("{key}={value}")]);
    }
    if let Some(dir) = &config.working_dir {
        args.extend(["--workdir".into(), dir.display().to_string()]);
    }
    args.push(image_id.to_string());
    args.extend(config.command.iter().cloned());
    args
}

/// Extracts the image id from `image inspect` JSON output.
fn parse_image_id(json: &serde_json::Value) -> Option<String> {
    json.as_array()?
        .first()?
        .get("Id")?
        .as_str()
        .map(ToString::to_string)
}

/// Parses the exit code printed by `wait`.
fn parse_exit_code(stdout: &str) -> Option<i32> {
    stdout.lines().next()?.trim().parse().ok()
}

fn failure_reason(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        stderr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_args_place_image_before_command() {
        let config = ContainerConfig {
            name: Some("hello".into()),
            command: vec!["--greeting".into(), "hi".into()],
            env: vec![("RUST_LOG".into(), "info".into())],
            labels: vec![("suite".into(), "smoke".into())],
            working_dir: Some(PathBuf::from("/app")),
        };
        let args = create_args("sha256:abc", &config);
        assert_eq!(
            args,
            vec![
                "create",
                "--label",
                MANAGED_LABEL,
                "--name",
                "hello",
                "--label",
                "suite=smoke",
                "--env",
                "RUST_LOG=info",
                "--workdir",
                "/app",
                "sha256:abc",
                "--greeting",
                "hi",
            ]
        );
    }

    #[test]
    fn image_id_is_read_from_first_entry() {
        let json = serde_json::json!([{ "Id": "sha256:1234", "RepoTags": ["app:latest"] }]);
        assert_eq!(parse_image_id(&json).as_deref(), Some("sha256:1234"));
        assert_eq!(parse_image_id(&serde_json::json!([])), None);
        assert_eq!(parse_image_id(&serde_json::json!({ "Id": "x" })), None);
    }

    #[test]
    fn exit_code_parsing() {
        assert_eq!(parse_exit_code("0\n"), Some(0));
        assert_eq!(parse_exit_code("137"), Some(137));
        assert_eq!(parse_exit_code(""), None);
        assert_eq!(parse_exit_code("Error: no such container"), None);
    }

    #[test]
    fn missing_binary_is_not_found() {
        let err = CliBackend::locate("dockhand-no-such-cli", &HarnessConfig::default())
            .expect_err("binary should not exist");
        assert!(matches!(err, DockhandError::NotFound { .. }));
    }

    #[test]
    fn unusable_binary_is_unavailable() {
        let cli = CliBackend::with_binary(
            "docker",
            PathBuf::from("/nonexistent/docker"),
            &HarnessConfig::default(),
        );
        assert!(!cli.is_available());
        assert_eq!(cli.name(), "docker");
    }
}
