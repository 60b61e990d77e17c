//! Build artifacts gathered for release.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Wheel,
    Sdist,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Wheel => f.write_str("wheel"),
            ArtifactKind::Sdist => f.write_str("sdist"),
        }
    }
}

/// A named binary blob produced by a job, tagged with the platform that
/// built it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub kind: ArtifactKind,
    pub platform: String,
    pub size_bytes: u64,
    /// Raw payload. Excluded from serialized run reports.
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl Artifact {
    pub fn new(
        name: impl Into<String>,
        kind: ArtifactKind,
        platform: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            platform: platform.into(),
            size_bytes: data.len() as u64,
            data,
        }
    }
}

/// The complete set staged for one release: one wheel per platform plus
/// a single sdist.
#[derive(Debug, Clone, Default)]
pub struct ArtifactSet {
    wheels: BTreeMap<String, Artifact>,
    sdist: Option<Artifact>,
}

impl ArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a wheel keyed by its platform, returning the artifact it
    /// displaced when two jobs built wheels for the same platform.
    pub fn insert_wheel(&mut self, artifact: Artifact) -> Option<Artifact> {
        self.wheels.insert(artifact.platform.clone(), artifact)
    }

    pub fn set_sdist(&mut self, artifact: Artifact) {
        self.sdist = Some(artifact);
    }

    pub fn wheels(&self) -> impl Iterator<Item = &Artifact> {
        self.wheels.values()
    }

    pub fn wheel_for(&self, platform: &str) -> Option<&Artifact> {
        self.wheels.get(platform)
    }

    pub fn sdist(&self) -> Option<&Artifact> {
        self.sdist.as_ref()
    }

    /// Platforms with a staged wheel, in sorted order.
    pub fn platforms(&self) -> Vec<&str> {
        self.wheels.keys().map(String::as_str).collect()
    }

    pub fn wheel_count(&self) -> usize {
        self.wheels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wheels.is_empty() && self.sdist.is_none()
    }
}
