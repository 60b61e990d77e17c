//! Per-job step execution.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{Duration, timeout};
use tracing::{debug, error, info, warn};

use wheelwright_cache::{CacheResolver, pack, unpack};
use wheelwright_core::artifact::{Artifact, ArtifactKind};
use wheelwright_core::interpolate::InterpolationContext;
use wheelwright_core::job::{
    FailurePolicy, JobResult, JobSpec, JobStatus, SkipReason, StepResult, StepSpec, StepStatus,
};
use wheelwright_core::workflow::JobRole;

use crate::action::{ActionContext, ActionOutcome, ActionRunner, CacheHint};
use crate::collect::collect_artifact;

/// Executes the steps of one job in order.
pub struct JobExecutor {
    runner: Arc<dyn ActionRunner>,
    cache: Option<Arc<CacheResolver>>,
    workspace: PathBuf,
}

enum Attempt {
    Completed(ActionOutcome),
    Error(String),
    TimedOut,
}

impl JobExecutor {
    pub fn new(
        runner: Arc<dyn ActionRunner>,
        cache: Option<Arc<CacheResolver>>,
        workspace: PathBuf,
    ) -> Self {
        Self {
            runner,
            cache,
            workspace,
        }
    }

    /// Run every step of the job and record the outcome.
    ///
    /// Never returns an error: every failure mode lands in the result so
    /// sibling jobs keep their own records.
    pub async fn execute(&self, job: &JobSpec, cancel: watch::Receiver<bool>) -> JobResult {
        let started_at = Utc::now();
        let start = Instant::now();
        info!(job = %job.display_name, steps = job.steps.len(), "job started");

        let interp = interpolation_context(job);
        let mut steps: Vec<StepResult> = Vec::with_capacity(job.steps.len());
        let mut failed = false;
        let mut cancelled = false;

        for step in &job.steps {
            // Cancellation takes effect between steps; a running step is
            // allowed to finish.
            if *cancel.borrow() {
                cancelled = true;
            }
            if cancelled {
                steps.push(StepResult::skipped(&step.name, SkipReason::Cancelled));
                continue;
            }
            if failed {
                steps.push(StepResult::skipped(&step.name, SkipReason::EarlierFailure));
                continue;
            }

            if let Some(condition) = &step.condition {
                let ctx = job.eval_context(&steps);
                if !condition.evaluate(&ctx) {
                    debug!(
                        job = %job.display_name,
                        step = %step.name,
                        condition = %condition,
                        "condition unmet, skipping"
                    );
                    steps.push(StepResult::skipped(&step.name, SkipReason::ConditionUnmet));
                    continue;
                }
            }

            let cache_hint = self.restore_cache(job, step).await;
            let result = self.run_step(job, step, cache_hint, &interp).await;
            let succeeded = result.status.is_succeeded();
            let hard_failure = result.status.is_hard_failure();
            steps.push(result);

            if hard_failure {
                failed = true;
                continue;
            }
            if succeeded && step.cache {
                self.save_cache(job, step).await;
            }
        }

        let artifact = if job.role == JobRole::BuildWheel && !failed && !cancelled {
            self.collect_wheel(job, &steps, &interp).await
        } else {
            None
        };

        let status = if cancelled {
            JobStatus::Cancelled
        } else if failed {
            JobStatus::Failed
        } else {
            JobStatus::Succeeded
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        match status {
            JobStatus::Succeeded => info!(job = %job.display_name, duration_ms, "job succeeded"),
            JobStatus::Failed => error!(job = %job.display_name, duration_ms, "job failed"),
            JobStatus::Cancelled => warn!(job = %job.display_name, duration_ms, "job cancelled"),
        }

        JobResult {
            job_id: job.id,
            identity: job.identity.clone(),
            display_name: job.display_name.clone(),
            role: job.role,
            platform: job.platform.clone(),
            status,
            steps,
            artifact,
            started_at,
            duration_ms,
        }
    }

    async fn run_step(
        &self,
        job: &JobSpec,
        step: &StepSpec,
        cache: Option<CacheHint>,
        interp: &InterpolationContext,
    ) -> StepResult {
        let started_at = Utc::now();
        let start = Instant::now();

        let command = interp.interpolate(&step.run);
        let workspace = self.step_workspace(step, interp);
        let mut env = job.env.clone();
        env.extend(job.matrix_env());
        for (key, value) in &step.env {
            env.insert(key.clone(), interp.interpolate(value));
        }

        let ctx = ActionContext {
            step_name: step.name.clone(),
            command,
            workspace,
            env,
            cache,
        };

        let max_attempts = step.retry.map(|r| r.max_attempts.max(1)).unwrap_or(1);
        let retry_delay = step.retry.map(|r| r.delay_secs).unwrap_or(0);

        let mut attempts = 0u32;
        let final_attempt = loop {
            attempts += 1;
            let attempt = match timeout(
                Duration::from_secs(step.timeout_secs),
                self.runner.invoke(&ctx),
            )
            .await
            {
                Ok(Ok(outcome)) => Attempt::Completed(outcome),
                Ok(Err(e)) => Attempt::Error(e.to_string()),
                Err(_) => Attempt::TimedOut,
            };

            let succeeded = matches!(&attempt, Attempt::Completed(o) if o.success());
            if succeeded || attempts >= max_attempts {
                break attempt;
            }
            info!(
                job = %job.display_name,
                step = %step.name,
                attempt = attempts,
                max_attempts,
                "step failed, retrying"
            );
            tokio::time::sleep(Duration::from_secs(retry_delay)).await;
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match final_attempt {
            Attempt::Completed(outcome) if outcome.success() => StepResult {
                name: step.name.clone(),
                status: StepStatus::Succeeded,
                exit_code: Some(outcome.exit_code),
                stdout: outcome.stdout,
                stderr: outcome.stderr,
                error: None,
                started_at,
                duration_ms,
                attempts,
            },
            Attempt::Completed(outcome) => {
                warn!(
                    job = %job.display_name,
                    step = %step.name,
                    exit_code = outcome.exit_code,
                    attempts,
                    "step failed"
                );
                StepResult {
                    name: step.name.clone(),
                    status: failure_status(step.policy),
                    exit_code: Some(outcome.exit_code),
                    stdout: outcome.stdout,
                    stderr: outcome.stderr,
                    error: None,
                    started_at,
                    duration_ms,
                    attempts,
                }
            }
            Attempt::Error(message) => {
                warn!(job = %job.display_name, step = %step.name, error = %message, "step could not run");
                StepResult {
                    name: step.name.clone(),
                    status: failure_status(step.policy),
                    exit_code: None,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    error: Some(message),
                    started_at,
                    duration_ms,
                    attempts,
                }
            }
            Attempt::TimedOut => {
                warn!(
                    job = %job.display_name,
                    step = %step.name,
                    timeout_secs = step.timeout_secs,
                    "step timed out"
                );
                StepResult {
                    name: step.name.clone(),
                    status: failure_status(step.policy),
                    exit_code: None,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    error: Some(format!("timed out after {} seconds", step.timeout_secs)),
                    started_at,
                    duration_ms,
                    attempts,
                }
            }
        }
    }

    fn step_workspace(&self, step: &StepSpec, interp: &InterpolationContext) -> PathBuf {
        match &step.working_directory {
            Some(dir) => {
                let resolved = PathBuf::from(interp.interpolate(dir));
                if resolved.is_absolute() {
                    resolved
                } else {
                    self.workspace.join(resolved)
                }
            }
            None => self.workspace.clone(),
        }
    }

    /// Restore the workflow cache for a cached step. Failures degrade to
    /// a miss so a broken store never fails the build.
    async fn restore_cache(&self, job: &JobSpec, step: &StepSpec) -> Option<CacheHint> {
        if !step.cache {
            return None;
        }
        let resolver = self.cache.as_ref()?;
        match resolver.resolve().await {
            Ok(handle) => {
                let hint = if handle.partial {
                    CacheHint::Partial
                } else if handle.hit() {
                    CacheHint::Exact
                } else {
                    CacheHint::Miss
                };
                if let Some(data) = handle.data {
                    let dest = resolver.base_dir().to_path_buf();
                    let unpacked =
                        tokio::task::spawn_blocking(move || unpack(&data, &dest)).await;
                    match unpacked {
                        Ok(Ok(())) => {
                            debug!(job = %job.display_name, step = %step.name, "cache restored");
                        }
                        Ok(Err(e)) => {
                            warn!(job = %job.display_name, step = %step.name, error = %e, "cache restore failed");
                            return Some(CacheHint::Miss);
                        }
                        Err(e) => {
                            warn!(job = %job.display_name, step = %step.name, error = %e, "cache restore task failed");
                            return Some(CacheHint::Miss);
                        }
                    }
                }
                Some(hint)
            }
            Err(e) => {
                warn!(job = %job.display_name, step = %step.name, error = %e, "cache lookup failed");
                Some(CacheHint::Miss)
            }
        }
    }

    /// Pack the cache paths and store them under the current primary key.
    async fn save_cache(&self, job: &JobSpec, step: &StepSpec) {
        let Some(resolver) = self.cache.as_ref() else {
            return;
        };
        if resolver.paths().is_empty() {
            return;
        }
        let paths = resolver.paths().to_vec();
        let base_dir = resolver.base_dir().to_path_buf();
        let packed = tokio::task::spawn_blocking(move || pack(&paths, &base_dir)).await;
        match packed {
            Ok(Ok(data)) => {
                if let Err(e) = resolver.save(data).await {
                    warn!(job = %job.display_name, step = %step.name, error = %e, "cache save failed");
                }
            }
            Ok(Err(e)) => {
                warn!(job = %job.display_name, step = %step.name, error = %e, "cache pack failed");
            }
            Err(e) => {
                warn!(job = %job.display_name, step = %step.name, error = %e, "cache pack task failed");
            }
        }
    }

    /// Read the wheel left behind by the last succeeded artifact step.
    async fn collect_wheel(
        &self,
        job: &JobSpec,
        steps: &[StepResult],
        interp: &InterpolationContext,
    ) -> Option<Artifact> {
        for (spec, result) in job.steps.iter().zip(steps.iter()).rev() {
            let Some(path) = &spec.artifact else {
                continue;
            };
            if !result.status.is_succeeded() {
                continue;
            }
            let path = PathBuf::from(interp.interpolate(&path.to_string_lossy()));
            match collect_artifact(&path, &self.workspace).await {
                Ok((name, data)) => {
                    info!(
                        job = %job.display_name,
                        artifact = %name,
                        size_bytes = data.len(),
                        "wheel collected"
                    );
                    return Some(Artifact::new(
                        name,
                        ArtifactKind::Wheel,
                        job.platform.as_str(),
                        data,
                    ));
                }
                Err(e) => {
                    warn!(job = %job.display_name, error = %e, "failed to collect wheel");
                    return None;
                }
            }
        }
        warn!(job = %job.display_name, "build-wheel job finished without an artifact step");
        None
    }
}

fn failure_status(policy: FailurePolicy) -> StepStatus {
    match policy {
        FailurePolicy::FailFast => StepStatus::Failed,
        FailurePolicy::ContinueOnError => StepStatus::SoftFailed,
    }
}

fn interpolation_context(job: &JobSpec) -> InterpolationContext {
    let mut matrix: HashMap<String, String> = job
        .attributes
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    matrix.insert("role".to_string(), job.role.as_str().to_string());
    InterpolationContext {
        matrix,
        env: job.env.clone(),
    }
}
