//! Resolved matrix jobs and their execution results.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::condition::{Condition, EvalContext};
use crate::ids::JobId;
use crate::workflow::{JobRole, RetryPolicy};

/// The resolved axis-value tuple that names a job within a run.
///
/// Two jobs may carry the same identity: an include entry that repeats a
/// product combination is scheduled as a separate job and the results
/// table keeps both rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobIdentity(Vec<(String, String)>);

impl JobIdentity {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }
}

impl fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

/// How a step failure affects the rest of the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// A failure fails the job and the remaining steps are skipped.
    FailFast,
    /// A failure is recorded and the job continues.
    ContinueOnError,
}

/// A step bound to one job, with workflow-level defaults applied and
/// its condition parsed.
#[derive(Debug, Clone)]
pub struct StepSpec {
    pub name: String,
    pub run: String,
    pub condition: Option<Condition>,
    pub policy: FailurePolicy,
    pub env: HashMap<String, String>,
    pub working_directory: Option<String>,
    pub timeout_secs: u64,
    pub cache: bool,
    pub artifact: Option<PathBuf>,
    pub retry: Option<RetryPolicy>,
}

/// One executable unit produced by matrix expansion.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: JobId,
    pub identity: JobIdentity,
    pub display_name: String,
    pub role: JobRole,
    /// Value of the platform axis, used to tag artifacts.
    pub platform: String,
    pub attributes: IndexMap<String, String>,
    pub env: HashMap<String, String>,
    pub steps: Vec<StepSpec>,
}

impl JobSpec {
    /// Matrix attributes exported to steps as `MATRIX_<AXIS>` variables.
    pub fn matrix_env(&self) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = self
            .attributes
            .iter()
            .map(|(key, value)| (format!("MATRIX_{}", env_key(key)), value.clone()))
            .collect();
        env.insert("MATRIX_ROLE".to_string(), self.role.as_str().to_string());
        env
    }

    pub fn eval_context<'a>(&'a self, prior: &'a [StepResult]) -> EvalContext<'a> {
        EvalContext {
            attributes: &self.attributes,
            role: self.role.as_str(),
            prior,
        }
    }
}

fn env_key(axis: &str) -> String {
    axis.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Why a step was skipped rather than run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The step's condition evaluated to false.
    ConditionUnmet,
    /// An earlier step already failed the job.
    EarlierFailure,
    /// The run was cancelled before the step started.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    /// The step failed and the failure counts against the job.
    Failed,
    /// The step failed but was marked continue-on-error.
    SoftFailed,
    Skipped(SkipReason),
}

impl StepStatus {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, StepStatus::Succeeded)
    }

    pub fn is_hard_failure(&self) -> bool {
        matches!(self, StepStatus::Failed)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StepStatus::Skipped(_))
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Succeeded => f.write_str("succeeded"),
            StepStatus::Failed => f.write_str("failed"),
            StepStatus::SoftFailed => f.write_str("soft-failed"),
            StepStatus::Skipped(SkipReason::ConditionUnmet) => f.write_str("skipped (condition)"),
            StepStatus::Skipped(SkipReason::EarlierFailure) => {
                f.write_str("skipped (earlier failure)")
            }
            StepStatus::Skipped(SkipReason::Cancelled) => f.write_str("skipped (cancelled)"),
        }
    }
}

/// Recorded outcome of a single step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub status: StepStatus,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub stdout: Vec<String>,
    #[serde(default)]
    pub stderr: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Attempts actually made, 0 for skipped steps.
    pub attempts: u32,
}

impl StepResult {
    pub fn skipped(name: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Skipped(reason),
            exit_code: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            error: None,
            started_at: Utc::now(),
            duration_ms: 0,
            attempts: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, JobStatus::Succeeded)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Succeeded => f.write_str("succeeded"),
            JobStatus::Failed => f.write_str("failed"),
            JobStatus::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Full record of one executed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub identity: JobIdentity,
    pub display_name: String,
    pub role: JobRole,
    pub platform: String,
    pub status: JobStatus,
    pub steps: Vec<StepResult>,
    #[serde(default)]
    pub artifact: Option<Artifact>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl JobResult {
    pub fn failed_steps(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter().filter(|s| s.status.is_hard_failure())
    }
}
