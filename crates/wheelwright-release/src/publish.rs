//! The publish seam and its command-backed and in-memory publishers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use wheelwright_core::artifact::{Artifact, ArtifactSet};
use wheelwright_core::{Error, Result};
use wheelwright_runner::{ActionContext, ActionRunner, ShellRunner};

/// Credential values resolved from the process environment at run time.
#[derive(Debug, Clone, Default)]
pub struct PublishCredentials {
    env: HashMap<String, String>,
}

impl PublishCredentials {
    /// Capture the named variables that are present in the environment.
    /// Absent names are simply left out; `missing` reports them.
    pub fn from_env(names: &[String]) -> Self {
        let mut env = HashMap::new();
        for name in names {
            if let Ok(value) = std::env::var(name) {
                env.insert(name.clone(), value);
            }
        }
        Self { env }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.env.insert(name.into(), value.into());
    }

    pub fn vars(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Names from `requested` that did not resolve to a value.
    pub fn missing(&self, requested: &[String]) -> Vec<String> {
        requested
            .iter()
            .filter(|name| !self.env.contains_key(name.as_str()))
            .cloned()
            .collect()
    }
}

/// What the publisher accepted, echoed into the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct PublishReceipt {
    pub wheels: Vec<String>,
    pub sdist: Option<String>,
    pub destination: String,
}

impl PublishReceipt {
    fn for_set(set: &ArtifactSet, destination: impl Into<String>) -> Self {
        Self {
            wheels: set.wheels().map(|w| w.name.clone()).collect(),
            sdist: set.sdist().map(|s| s.name.clone()),
            destination: destination.into(),
        }
    }
}

/// Performs the publish action for a complete release set.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Fire-once contract: invoked at most once per run, with the
    /// complete set. A rejection (duplicate version, bad credentials)
    /// surfaces as [`Error::PublishRejected`].
    async fn publish(
        &self,
        set: &ArtifactSet,
        credentials: &PublishCredentials,
    ) -> Result<PublishReceipt>;
}

/// Stages the release set into a directory tree and hands it to a
/// configured shell command.
///
/// Layout under the staging directory: `wheels/<platform>/<name>`,
/// `sdist/<name>` and a `manifest.json` describing the set. The command
/// finds the tree through `WHEELWRIGHT_RELEASE_DIR` and runs with the
/// resolved credential variables in its environment.
pub struct CommandPublisher {
    command: String,
    staging_dir: PathBuf,
    runner: ShellRunner,
}

impl CommandPublisher {
    pub fn new(command: impl Into<String>, staging_dir: PathBuf) -> Self {
        Self {
            command: command.into(),
            staging_dir,
            runner: ShellRunner::default(),
        }
    }

    async fn stage(&self, set: &ArtifactSet) -> Result<()> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        for wheel in set.wheels() {
            let dir = self.staging_dir.join("wheels").join(&wheel.platform);
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(dir.join(&wheel.name), &wheel.data).await?;
        }
        if let Some(sdist) = set.sdist() {
            let dir = self.staging_dir.join("sdist");
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(dir.join(&sdist.name), &sdist.data).await?;
        }
        let manifest = serde_json::to_vec_pretty(&Manifest::for_set(set))?;
        tokio::fs::write(self.staging_dir.join("manifest.json"), manifest).await?;
        Ok(())
    }
}

#[async_trait]
impl Publisher for CommandPublisher {
    async fn publish(
        &self,
        set: &ArtifactSet,
        credentials: &PublishCredentials,
    ) -> Result<PublishReceipt> {
        self.stage(set).await?;
        debug!(dir = %self.staging_dir.display(), "release set staged");

        let mut env = credentials.vars().clone();
        env.insert(
            "WHEELWRIGHT_RELEASE_DIR".to_string(),
            self.staging_dir.display().to_string(),
        );
        let ctx = ActionContext {
            step_name: "publish".to_string(),
            command: self.command.clone(),
            workspace: self.staging_dir.clone(),
            env,
            cache: None,
        };

        let outcome = self.runner.invoke(&ctx).await?;
        if !outcome.success() {
            let detail = outcome
                .stderr
                .last()
                .cloned()
                .unwrap_or_else(|| format!("exit code {}", outcome.exit_code));
            return Err(Error::PublishRejected(detail));
        }

        info!(wheels = set.wheel_count(), "release published");
        Ok(PublishReceipt::for_set(
            set,
            self.staging_dir.display().to_string(),
        ))
    }
}

#[derive(Serialize)]
struct Manifest {
    wheels: Vec<ManifestEntry>,
    sdist: Option<ManifestEntry>,
}

impl Manifest {
    fn for_set(set: &ArtifactSet) -> Self {
        Self {
            wheels: set.wheels().map(ManifestEntry::from).collect(),
            sdist: set.sdist().map(ManifestEntry::from),
        }
    }
}

#[derive(Serialize)]
struct ManifestEntry {
    name: String,
    platform: String,
    size_bytes: u64,
}

impl From<&Artifact> for ManifestEntry {
    fn from(artifact: &Artifact) -> Self {
        Self {
            name: artifact.name.clone(),
            platform: artifact.platform.clone(),
            size_bytes: artifact.size_bytes,
        }
    }
}

/// Records publish calls without side effects.
#[derive(Default)]
pub struct MemoryPublisher {
    publishes: AtomicUsize,
    last: Mutex<Option<PublishedSet>>,
    reject_with: Option<String>,
}

/// Snapshot of the set a publish call received.
#[derive(Debug, Clone)]
pub struct PublishedSet {
    pub platforms: Vec<String>,
    pub wheel_names: Vec<String>,
    pub sdist: Option<String>,
    pub credential_names: Vec<String>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A publisher that rejects every call, the way a registry rejects
    /// a duplicate version.
    pub fn rejecting(message: impl Into<String>) -> Self {
        Self {
            reject_with: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn publish_count(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    pub fn last_published(&self) -> Option<PublishedSet> {
        self.last.lock().map(|guard| guard.clone()).unwrap_or(None)
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(
        &self,
        set: &ArtifactSet,
        credentials: &PublishCredentials,
    ) -> Result<PublishReceipt> {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.reject_with {
            return Err(Error::PublishRejected(message.clone()));
        }

        let mut credential_names: Vec<String> = credentials.vars().keys().cloned().collect();
        credential_names.sort();
        let snapshot = PublishedSet {
            platforms: set.platforms().iter().map(|p| p.to_string()).collect(),
            wheel_names: set.wheels().map(|w| w.name.clone()).collect(),
            sdist: set.sdist().map(|s| s.name.clone()),
            credential_names,
        };
        if let Ok(mut guard) = self.last.lock() {
            *guard = Some(snapshot);
        }

        Ok(PublishReceipt::for_set(set, "memory"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wheelwright_core::artifact::ArtifactKind;

    fn release_set() -> ArtifactSet {
        let mut set = ArtifactSet::new();
        set.insert_wheel(Artifact::new(
            "pkg-linux.whl",
            ArtifactKind::Wheel,
            "linux",
            b"linux-wheel".to_vec(),
        ));
        set.set_sdist(Artifact::new(
            "pkg-1.0.tar.gz",
            ArtifactKind::Sdist,
            "source",
            b"sdist".to_vec(),
        ));
        set
    }

    #[tokio::test]
    async fn test_command_publisher_stages_layout() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = CommandPublisher::new(
            r#"test -f "$WHEELWRIGHT_RELEASE_DIR/wheels/linux/pkg-linux.whl" \
              && test -f "$WHEELWRIGHT_RELEASE_DIR/sdist/pkg-1.0.tar.gz" \
              && test -f "$WHEELWRIGHT_RELEASE_DIR/manifest.json" \
              && test "$TWINE_TOKEN" = secret"#,
            dir.path().join("staging"),
        );
        let mut credentials = PublishCredentials::default();
        credentials.insert("TWINE_TOKEN", "secret");

        let receipt = publisher
            .publish(&release_set(), &credentials)
            .await
            .unwrap();

        assert_eq!(receipt.wheels, vec!["pkg-linux.whl"]);
        assert_eq!(receipt.sdist.as_deref(), Some("pkg-1.0.tar.gz"));

        let manifest =
            std::fs::read_to_string(dir.path().join("staging/manifest.json")).unwrap();
        assert!(manifest.contains("pkg-linux.whl"));
        assert!(manifest.contains("\"platform\": \"linux\""));
    }

    #[tokio::test]
    async fn test_command_publisher_maps_failure_to_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = CommandPublisher::new(
            "echo 'version already exists' >&2; exit 3",
            dir.path().join("staging"),
        );

        let err = publisher
            .publish(&release_set(), &PublishCredentials::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PublishRejected(_)));
        assert!(err.to_string().contains("version already exists"));
    }

    #[tokio::test]
    async fn test_memory_publisher_records_calls() {
        let publisher = MemoryPublisher::new();
        let mut credentials = PublishCredentials::default();
        credentials.insert("TWINE_TOKEN", "secret");

        assert_eq!(publisher.publish_count(), 0);
        publisher
            .publish(&release_set(), &credentials)
            .await
            .unwrap();

        assert_eq!(publisher.publish_count(), 1);
        let last = publisher.last_published().unwrap();
        assert_eq!(last.platforms, vec!["linux"]);
        assert_eq!(last.sdist.as_deref(), Some("pkg-1.0.tar.gz"));
        assert_eq!(last.credential_names, vec!["TWINE_TOKEN"]);
    }

    #[tokio::test]
    async fn test_rejecting_publisher() {
        let publisher = MemoryPublisher::rejecting("duplicate version");
        let err = publisher
            .publish(&release_set(), &PublishCredentials::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PublishRejected(_)));
        assert_eq!(publisher.publish_count(), 1);
    }

    #[test]
    fn test_credentials_from_env() {
        // PATH is always present in a test environment.
        let names = vec!["PATH".to_string(), "WHEELWRIGHT_ABSENT_VAR".to_string()];
        let credentials = PublishCredentials::from_env(&names);

        assert!(credentials.vars().contains_key("PATH"));
        assert_eq!(
            credentials.missing(&names),
            vec!["WHEELWRIGHT_ABSENT_VAR".to_string()]
        );
    }
}
