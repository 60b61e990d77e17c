//! Bounded-parallel dispatch of expanded jobs.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{error, info};

use wheelwright_core::ids::RunId;
use wheelwright_core::job::{JobResult, JobSpec};
use wheelwright_runner::JobExecutor;

use crate::report::RunReport;

/// Dispatches expanded jobs to the executor with bounded parallelism.
pub struct JobScheduler {
    executor: Arc<JobExecutor>,
    max_parallel: usize,
}

impl JobScheduler {
    pub fn new(executor: Arc<JobExecutor>, max_parallel: usize) -> Self {
        Self {
            executor,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Run every job and collect results as they complete.
    ///
    /// No ordering is guaranteed between jobs; each job's own steps run
    /// strictly in sequence. Cancellation reaches workers through the
    /// watch channel and takes effect between steps.
    pub async fn run(&self, jobs: Vec<JobSpec>, cancel: watch::Receiver<bool>) -> RunReport {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let start = Instant::now();
        info!(
            run = %run_id,
            jobs = jobs.len(),
            max_parallel = self.max_parallel,
            "run started"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut join_set = JoinSet::new();
        for job in jobs {
            let semaphore = Arc::clone(&semaphore);
            let executor = Arc::clone(&self.executor);
            let cancel = cancel.clone();
            join_set.spawn(async move {
                // The semaphore outlives every task and is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                executor.execute(&job, cancel).await
            });
        }

        let mut results: Vec<JobResult> = Vec::with_capacity(join_set.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = %e, "job task panicked"),
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let report = RunReport {
            run_id,
            results,
            started_at,
            duration_ms,
        };
        info!(
            run = %run_id,
            jobs = report.results.len(),
            succeeded = report.all_succeeded(),
            duration_ms,
            "run finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::MatrixExpander;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Duration;
    use wheelwright_core::job::JobStatus;
    use wheelwright_core::workflow::WorkflowDefinition;
    use wheelwright_runner::{ActionContext, ActionOutcome, ActionRunner};

    fn jobs(yaml: &str) -> Vec<JobSpec> {
        let workflow: WorkflowDefinition = serde_yaml::from_str(yaml).unwrap();
        MatrixExpander::new().expand(&workflow).unwrap()
    }

    fn scheduler(runner: Arc<dyn ActionRunner>, max_parallel: usize) -> JobScheduler {
        let executor = Arc::new(JobExecutor::new(runner, None, std::env::temp_dir()));
        JobScheduler::new(executor, max_parallel)
    }

    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    /// Tracks how many invocations overlap.
    struct GateRunner {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl GateRunner {
        fn new() -> Self {
            Self {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl ActionRunner for GateRunner {
        async fn invoke(&self, _ctx: &ActionContext) -> wheelwright_core::Result<ActionOutcome> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(25)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(ActionOutcome {
                exit_code: 0,
                stdout: Vec::new(),
                stderr: Vec::new(),
                duration_ms: 25,
            })
        }
    }

    /// Fails any job whose MATRIX_OS is in the failing set.
    struct FailPlatformRunner {
        failing: Vec<String>,
    }

    #[async_trait::async_trait]
    impl ActionRunner for FailPlatformRunner {
        async fn invoke(&self, ctx: &ActionContext) -> wheelwright_core::Result<ActionOutcome> {
            let os = ctx.env.get("MATRIX_OS").cloned().unwrap_or_default();
            let exit_code = if self.failing.contains(&os) { 1 } else { 0 };
            Ok(ActionOutcome {
                exit_code,
                stdout: Vec::new(),
                stderr: Vec::new(),
                duration_ms: 1,
            })
        }
    }

    const SIX_JOBS: &str = r#"
version: "1"
name: wheels
matrix:
  axes:
    os: [linux, macos]
    runtime: ["3.7", "3.9", "3.11"]
steps:
  - name: test
    run: pytest
"#;

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let runner = Arc::new(GateRunner::new());
        let scheduler = scheduler(runner.clone(), 2);

        let report = scheduler.run(jobs(SIX_JOBS), no_cancel()).await;

        assert_eq!(report.results.len(), 6);
        assert!(report.all_succeeded());
        assert!(runner.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_failed_job_reported_without_stopping_others() {
        let runner = Arc::new(FailPlatformRunner {
            failing: vec!["macos".to_string()],
        });
        let scheduler = scheduler(runner, 4);
        let yaml = r#"
version: "1"
name: wheels
matrix:
  axes:
    os: [linux, macos]
steps:
  - name: test
    run: pytest
"#;

        let report = scheduler.run(jobs(yaml), no_cancel()).await;

        assert_eq!(report.results.len(), 2);
        assert!(!report.all_succeeded());
        let failed: Vec<String> = report.failed().iter().map(|i| i.to_string()).collect();
        assert_eq!(failed, vec!["os=macos"]);
    }

    #[tokio::test]
    async fn test_duplicate_identity_rows_are_kept() {
        let runner = Arc::new(GateRunner::new());
        let scheduler = scheduler(runner, 4);
        let yaml = r#"
version: "1"
name: wheels
matrix:
  axes:
    os: [linux]
  include:
    - os: linux
steps:
  - name: test
    run: pytest
"#;

        let report = scheduler.run(jobs(yaml), no_cancel()).await;

        assert_eq!(report.results.len(), 2);
        let identity = report.results[0].identity.clone();
        assert_eq!(report.results_for(&identity).len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_run_records_cancelled_jobs() {
        let runner = Arc::new(GateRunner::new());
        let scheduler = scheduler(runner, 2);
        let (tx, rx) = watch::channel(true);

        let report = scheduler.run(jobs(SIX_JOBS), rx).await;
        drop(tx);

        assert_eq!(report.results.len(), 6);
        assert!(!report.all_succeeded());
        assert!(report
            .results
            .iter()
            .all(|r| r.status == JobStatus::Cancelled));
    }
}
