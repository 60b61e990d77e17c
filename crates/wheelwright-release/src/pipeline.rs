//! Two-phase artifact pipeline: collect wheels, build the sdist, publish
//! exactly once.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use wheelwright_core::artifact::{Artifact, ArtifactKind, ArtifactSet};
use wheelwright_core::job::JobIdentity;
use wheelwright_core::workflow::{JobRole, ReleaseDefinition};
use wheelwright_core::{Error, Result};
use wheelwright_runner::{ActionContext, ActionRunner, collect_artifact};
use wheelwright_scheduler::RunReport;

use crate::publish::{PublishCredentials, PublishReceipt, Publisher};

/// How the release phase of a run ended.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    /// The publish action ran once with the complete set.
    Published(PublishReceipt),
    /// A job failed, so aggregation never ran and the publish action
    /// was invoked zero times. Distinct from a publish rejection.
    Aborted { failed: Vec<JobIdentity> },
}

impl ReleaseOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, ReleaseOutcome::Published(_))
    }
}

/// Runs after the whole matrix: gathers every build job's wheel, builds
/// the source distribution on this host, and invokes the publisher once.
pub struct ReleasePipeline {
    runner: Arc<dyn ActionRunner>,
    publisher: Arc<dyn Publisher>,
    definition: ReleaseDefinition,
    workspace: PathBuf,
}

impl ReleasePipeline {
    pub fn new(
        runner: Arc<dyn ActionRunner>,
        publisher: Arc<dyn Publisher>,
        definition: ReleaseDefinition,
        workspace: PathBuf,
    ) -> Self {
        Self {
            runner,
            publisher,
            definition,
            workspace,
        }
    }

    /// Gate on the run report, then aggregate and publish.
    ///
    /// Any job that did not succeed aborts the release before anything
    /// is built or published. Nothing is ever partially published.
    pub async fn run(
        &self,
        report: &RunReport,
        credentials: &PublishCredentials,
    ) -> Result<ReleaseOutcome> {
        if !report.all_succeeded() {
            let failed: Vec<JobIdentity> = report.failed().into_iter().cloned().collect();
            warn!(
                failed = failed.len(),
                "release aborted, not every job succeeded"
            );
            return Ok(ReleaseOutcome::Aborted { failed });
        }

        let mut set = self.collect_wheels(report)?;
        let sdist = self.build_sdist().await?;
        set.set_sdist(sdist);

        info!(
            wheels = set.wheel_count(),
            platforms = ?set.platforms(),
            "publishing release set"
        );
        let receipt = self.publisher.publish(&set, credentials).await?;
        Ok(ReleaseOutcome::Published(receipt))
    }

    fn collect_wheels(&self, report: &RunReport) -> Result<ArtifactSet> {
        let mut set = ArtifactSet::new();
        for result in &report.results {
            if result.role != JobRole::BuildWheel {
                continue;
            }
            match &result.artifact {
                Some(artifact) => {
                    if let Some(displaced) = set.insert_wheel(artifact.clone()) {
                        warn!(
                            platform = %artifact.platform,
                            displaced = %displaced.name,
                            "replacing earlier wheel for platform"
                        );
                    }
                }
                None => {
                    return Err(Error::Release(format!(
                        "build-wheel job ({}) produced no artifact",
                        result.identity
                    )));
                }
            }
        }
        Ok(set)
    }

    async fn build_sdist(&self) -> Result<Artifact> {
        info!(command = %self.definition.sdist.run, "building source distribution");
        let ctx = ActionContext {
            step_name: "sdist".to_string(),
            command: self.definition.sdist.run.clone(),
            workspace: self.workspace.clone(),
            env: HashMap::new(),
            cache: None,
        };
        let outcome = self.runner.invoke(&ctx).await?;
        if !outcome.success() {
            return Err(Error::Release(format!(
                "sdist command failed with exit code {}",
                outcome.exit_code
            )));
        }

        let (name, data) =
            collect_artifact(&self.definition.sdist.artifact, &self.workspace).await?;
        Ok(Artifact::new(name, ArtifactKind::Sdist, "source", data))
    }
}
