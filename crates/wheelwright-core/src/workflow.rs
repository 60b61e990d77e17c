//! Workflow definition types.
//!
//! These types represent the user-authored workflow YAML configuration:
//! a build matrix, a shared step template, and the optional cache and
//! release sections.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowDefinition {
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub matrix: MatrixDefinition,
    /// The axis whose value tags artifacts with their platform.
    #[serde(default = "default_platform_axis")]
    pub platform_axis: String,
    /// Role assigned to every product job. Include entries may override it.
    #[serde(default = "default_role")]
    pub role: JobRole,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub cache: Option<CacheDefinition>,
    #[serde(default)]
    pub release: Option<ReleaseDefinition>,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
}

fn default_platform_axis() -> String {
    "os".to_string()
}

fn default_role() -> JobRole {
    JobRole::Test
}

fn default_max_parallel() -> usize {
    4
}

fn default_step_timeout() -> u64 {
    1800
}

/// What a job contributes to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum JobRole {
    /// Runs the step template for one matrix cell.
    Test,
    /// Additionally hands its artifact to the release pipeline.
    BuildWheel,
}

impl JobRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRole::Test => "test",
            JobRole::BuildWheel => "build-wheel",
        }
    }
}

impl fmt::Display for JobRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "test" => Ok(JobRole::Test),
            "build-wheel" | "build_wheel" => Ok(JobRole::BuildWheel),
            other => Err(Error::InvalidWorkflow(format!(
                "unknown job role '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MatrixDefinition {
    /// Named axes in declaration order. The product of their values is
    /// the base job set.
    #[serde(default)]
    pub axes: IndexMap<String, Vec<AxisValue>>,
    /// Extra combinations appended after the product, never merged into it.
    #[serde(default)]
    pub include: Vec<IndexMap<String, AxisValue>>,
}

/// A scalar axis value as authored in YAML.
///
/// Unquoted scalars arrive as booleans or numbers; they normalize to
/// strings during matrix expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum AxisValue {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

impl fmt::Display for AxisValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisValue::Bool(b) => write!(f, "{}", b),
            AxisValue::Number(n) => write!(f, "{}", n),
            AxisValue::String(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepDefinition {
    pub name: String,
    /// Shell command, interpolated per job.
    pub run: String,
    /// Guard expression. Absent means the step always runs.
    #[serde(default)]
    pub condition: Option<String>,
    /// A failure is recorded but does not fail the job.
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    /// Overrides the workflow-level step timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Restore the workflow cache before this step and save it after.
    #[serde(default)]
    pub cache: bool,
    /// Path the step leaves its artifact at, interpolated per job.
    #[serde(default)]
    pub artifact: Option<PathBuf>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub delay_secs: u64,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_retry_delay() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheDefinition {
    /// Key prefix shared by every entry this workflow writes.
    pub namespace: String,
    /// Files whose contents feed the cache key hash.
    #[serde(default)]
    pub key_files: Vec<PathBuf>,
    /// Prefixes tried in order when the exact key misses. Defaults to
    /// the namespace itself.
    #[serde(default)]
    pub restore_keys: Vec<String>,
    /// Directories packed into the cache entry after a cached step.
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReleaseDefinition {
    pub sdist: SdistDefinition,
    pub publish: PublishDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SdistDefinition {
    /// Shell command that produces the source distribution.
    pub run: String,
    /// Path the command leaves the sdist at.
    pub artifact: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PublishDefinition {
    /// Shell command invoked once with the staged release set.
    pub command: String,
    /// Environment variables forwarded to the publish command.
    #[serde(default)]
    pub credentials_env: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const WORKFLOW_YAML: &str = r#"
version: "1"
name: treecorr-wheels
matrix:
  axes:
    os: [ubuntu-latest, macos-14]
    runtime: ["3.9", "3.10"]
  include:
    - os: ubuntu-latest
      runtime: "3.9"
      compiler: gcc-11
      role: build-wheel
env:
  CIBW_BUILD: cp39-*
steps:
  - name: checkout
    run: git checkout .
  - name: test
    run: pytest
    condition: matrix.runtime >= '3.10'
    continue_on_error: true
    timeout_secs: 600
cache:
  namespace: pip
  key_files: [requirements.txt]
  paths: [.pip-cache]
release:
  sdist:
    run: python -m build --sdist
    artifact: dist/pkg.tar.gz
  publish:
    command: twine upload
    credentials_env: [TWINE_TOKEN]
"#;

    #[test]
    fn test_workflow_yaml_parses() {
        let workflow: WorkflowDefinition = serde_yaml::from_str(WORKFLOW_YAML).unwrap();
        assert_eq!(workflow.name, "treecorr-wheels");
        assert_eq!(workflow.matrix.axes.len(), 2);
        assert_eq!(workflow.matrix.include.len(), 1);
        assert_eq!(workflow.steps.len(), 2);
        assert!(workflow.cache.is_some());
        assert!(workflow.release.is_some());
    }

    #[test]
    fn test_workflow_defaults() {
        let workflow: WorkflowDefinition = serde_yaml::from_str(WORKFLOW_YAML).unwrap();
        assert_eq!(workflow.platform_axis, "os");
        assert_eq!(workflow.role, JobRole::Test);
        assert_eq!(workflow.max_parallel, 4);
        assert_eq!(workflow.step_timeout_secs, 1800);
        assert!(!workflow.steps[0].continue_on_error);
        assert_eq!(workflow.steps[1].timeout_secs, Some(600));
    }

    #[test]
    fn test_axis_values_normalize_to_strings() {
        let yaml = r#"
axes:
  runtime: ["3.9", 3.5, 42, true]
"#;
        let matrix: MatrixDefinition = serde_yaml::from_str(yaml).unwrap();
        let rendered: Vec<String> = matrix.axes["runtime"]
            .iter()
            .map(|v| v.to_string())
            .collect();
        assert_eq!(rendered, vec!["3.9", "3.5", "42", "true"]);
    }

    #[test]
    fn test_job_role_parse() {
        assert_eq!("test".parse::<JobRole>().unwrap(), JobRole::Test);
        assert_eq!(
            "build-wheel".parse::<JobRole>().unwrap(),
            JobRole::BuildWheel
        );
        assert_eq!(
            "build_wheel".parse::<JobRole>().unwrap(),
            JobRole::BuildWheel
        );
        assert!("deploy".parse::<JobRole>().is_err());
    }

    #[test]
    fn test_retry_policy_defaults() {
        let retry: RetryPolicy = serde_yaml::from_str("{}").unwrap();
        assert_eq!(retry.max_attempts, 1);
        assert_eq!(retry.delay_secs, 10);
    }
}
