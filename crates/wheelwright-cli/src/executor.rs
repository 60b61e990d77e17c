//! Drives one workflow run: expansion, scheduling and the release phase.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;

use wheelwright_cache::{CacheResolver, FsStore};
use wheelwright_core::Result;
use wheelwright_core::workflow::WorkflowDefinition;
use wheelwright_release::{
    CommandPublisher, MemoryPublisher, PublishCredentials, Publisher, ReleaseOutcome,
    ReleasePipeline,
};
use wheelwright_runner::{ActionRunner, JobExecutor, ShellRunner};
use wheelwright_scheduler::{JobScheduler, MatrixExpander, RunReport};

/// Settings resolved from CLI flags and the config file.
pub struct RunOptions {
    pub workspace: PathBuf,
    pub max_parallel: Option<usize>,
    pub no_release: bool,
    pub cache_dir: PathBuf,
}

/// Outcome of one `wheelwright run` invocation.
pub struct RunSummary {
    pub report: RunReport,
    /// Absent when no release is configured or `--no-release` was given.
    pub release: Option<ReleaseOutcome>,
}

impl RunSummary {
    /// The process exit contract: every job succeeded and, when a
    /// release ran, it published.
    pub fn success(&self) -> bool {
        self.report.all_succeeded()
            && self
                .release
                .as_ref()
                .is_none_or(|outcome| outcome.is_published())
    }
}

/// Run a workflow with the host shell and the configured publisher.
pub async fn execute_workflow(
    workflow: &WorkflowDefinition,
    options: &RunOptions,
    cancel: watch::Receiver<bool>,
) -> Result<RunSummary> {
    let publisher: Arc<dyn Publisher> = match &workflow.release {
        Some(release) => Arc::new(CommandPublisher::new(
            release.publish.command.clone(),
            options.workspace.join(".wheelwright").join("release"),
        )),
        // Placeholder, never invoked without a release section.
        None => Arc::new(MemoryPublisher::new()),
    };
    execute_workflow_with(
        workflow,
        options,
        Arc::new(ShellRunner::default()),
        publisher,
        cancel,
    )
    .await
}

/// Run a workflow against explicit runner and publisher implementations.
pub async fn execute_workflow_with(
    workflow: &WorkflowDefinition,
    options: &RunOptions,
    runner: Arc<dyn ActionRunner>,
    publisher: Arc<dyn Publisher>,
    cancel: watch::Receiver<bool>,
) -> Result<RunSummary> {
    let jobs = MatrixExpander::new().expand(workflow)?;

    let cache = workflow.cache.as_ref().map(|definition| {
        let store = Arc::new(FsStore::new(options.cache_dir.clone()));
        Arc::new(CacheResolver::new(
            store,
            definition,
            options.workspace.clone(),
        ))
    });

    let executor = Arc::new(JobExecutor::new(
        Arc::clone(&runner),
        cache,
        options.workspace.clone(),
    ));
    let max_parallel = options.max_parallel.unwrap_or(workflow.max_parallel);
    let scheduler = JobScheduler::new(executor, max_parallel);
    let report = scheduler.run(jobs, cancel).await;

    let release = match &workflow.release {
        Some(definition) if !options.no_release => {
            let credentials = PublishCredentials::from_env(&definition.publish.credentials_env);
            let missing = credentials.missing(&definition.publish.credentials_env);
            if !missing.is_empty() {
                warn!(?missing, "credential variables not set in the environment");
            }
            let pipeline = ReleasePipeline::new(
                runner,
                publisher,
                definition.clone(),
                options.workspace.clone(),
            );
            Some(pipeline.run(&report, &credentials).await?)
        }
        _ => None,
    };

    Ok(RunSummary { report, release })
}
