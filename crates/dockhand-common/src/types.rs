//! Domain primitive types used across the Dockhand workspace.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_TAG;
use crate::error::{DockhandError, Result};

/// Unique identifier for a container instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random container ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first 12 characters, the way container tooling abbreviates IDs.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash algorithms accepted in image digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    /// SHA-256, 32-byte hash.
    Sha256,
    /// SHA-512, 64-byte hash.
    Sha512,
}

impl DigestAlgorithm {
    /// Prefix used in the textual `algorithm:hex` form.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Number of hex characters a hash of this algorithm must have.
    #[must_use]
    pub const fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }
}

/// Content digest pinning an image (`sha256:<hex>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest {
    algorithm: DigestAlgorithm,
    hex: String,
}

impl Digest {
    /// Returns the digest algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Returns the lowercase hex-encoded hash.
    #[must_use]
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl FromStr for Digest {
    type Err = DockhandError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: String| DockhandError::InvalidReference {
            reference: s.to_string(),
            reason,
        };
        let (prefix, hex) = s
            .split_once(':')
            .ok_or_else(|| invalid("digest must have the form algorithm:hex".into()))?;
        let algorithm = match prefix {
            "sha256" => DigestAlgorithm::Sha256,
            "sha512" => DigestAlgorithm::Sha512,
            other => return Err(invalid(format!("unsupported digest algorithm {other}"))),
        };
        if hex.len() != algorithm.hex_len() {
            return Err(invalid(format!(
                "{prefix} hash has length {}, expected {}",
                hex.len(),
                algorithm.hex_len()
            )));
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid("hash is not hex-encoded".into()));
        }
        Ok(Self {
            algorithm,
            hex: hex.to_ascii_lowercase(),
        })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.prefix(), self.hex)
    }
}

/// Identifier naming a container image to launch.
///
/// Grammar: `name[:tag][@algorithm:hex]`. The tag separator is the last `:`
/// after the last `/`, so a registry port (`localhost:5000/app`) is never
/// mistaken for a tag. A reference with neither tag nor digest is tagged
/// `latest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    name: String,
    tag: Option<String>,
    digest: Option<Digest>,
}

impl ImageReference {
    /// Parses a reference from text.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::InvalidReference`] if the name is empty,
    /// contains uppercase characters or whitespace, the tag is empty, or the
    /// digest is malformed.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| DockhandError::InvalidReference {
            reference: input.to_string(),
            reason: reason.to_string(),
        };

        let (rest, digest) = match input.split_once('@') {
            Some((rest, digest)) => (rest, Some(digest.parse::<Digest>()?)),
            None => (input, None),
        };

        let path_start = rest.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match rest[path_start..].rfind(':') {
            Some(i) => {
                let split = path_start + i;
                (&rest[..split], Some(&rest[split + 1..]))
            }
            None => (rest, None),
        };

        if name.is_empty() {
            return Err(invalid("image name is empty"));
        }
        if name.chars().any(|c| c.is_whitespace()) {
            return Err(invalid("image name contains whitespace"));
        }
        if name.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(invalid("image name must be lowercase"));
        }
        if tag.is_some_and(str::is_empty) {
            return Err(invalid("tag is empty"));
        }

        let tag = match (tag, &digest) {
            (Some(tag), _) => Some(tag.to_string()),
            (None, Some(_)) => None,
            (None, None) => Some(DEFAULT_TAG.to_string()),
        };

        Ok(Self {
            name: name.to_string(),
            tag,
            digest,
        })
    }

    /// Returns the repository name, including any registry host.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tag, if any.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Returns the pinned digest, if any.
    #[must_use]
    pub const fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    /// Returns the registry host when the first path component names one.
    ///
    /// A component is a registry host when it contains `.` or `:`, or is
    /// exactly `localhost`.
    #[must_use]
    pub fn registry(&self) -> Option<&str> {
        let (first, _) = self.name.split_once('/')?;
        (first.contains('.') || first.contains(':') || first == "localhost").then_some(first)
    }

    /// Returns a copy of this reference served from `registry`, unless the
    /// reference already names a registry host.
    #[must_use]
    pub fn with_registry(&self, registry: &str) -> Self {
        if self.registry().is_some() {
            return self.clone();
        }
        Self {
            name: format!("{}/{}", registry.trim_end_matches('/'), self.name),
            tag: self.tag.clone(),
            digest: self.digest.clone(),
        }
    }
}

impl FromStr for ImageReference {
    type Err = DockhandError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

/// Lifecycle state of a container handle.
///
/// States are totally ordered; a handle only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ContainerState {
    /// Container has been created but not yet started.
    Created,
    /// Container process is running and streaming output.
    Running,
    /// A readiness predicate has matched.
    Ready,
    /// Container process has been terminated.
    Stopped,
    /// All resources have been released. Terminal.
    Released,
}

impl ContainerState {
    /// Returns whether a handle in this state may move to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Released, _) => false,
            (Self::Created, Self::Ready) => false,
            (from, to) => to > from,
        }
    }

    /// Returns whether the underlying process may still be alive.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Ready)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Ready => write!(f, "ready"),
            Self::Stopped => write!(f, "stopped"),
            Self::Released => write!(f, "released"),
        }
    }
}

/// Output stream a log line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// A single decoded line of container output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Position in the container's output, starting at 0.
    pub seq: u64,
    /// Stream the line was read from.
    pub stream: LogStream,
    /// Line text without its terminator.
    pub text: String,
    /// Time the harness observed the line.
    pub observed_at: DateTime<Utc>,
}

impl LogLine {
    /// Creates a line observed now.
    #[must_use]
    pub fn new(seq: u64, stream: LogStream, text: impl Into<String>) -> Self {
        Self {
            seq,
            stream,
            text: text.into(),
            observed_at: Utc::now(),
        }
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}
