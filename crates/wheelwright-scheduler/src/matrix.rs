//! Matrix expansion for parallel job generation.

use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::debug;

use wheelwright_core::condition::Condition;
use wheelwright_core::ids::JobId;
use wheelwright_core::job::{FailurePolicy, JobIdentity, JobSpec, StepSpec};
use wheelwright_core::workflow::{AxisValue, JobRole, WorkflowDefinition};
use wheelwright_core::{Error, Result};

/// Expands a workflow's matrix into concrete job specifications.
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand the cartesian product of the declared axes, then append
    /// every include entry.
    ///
    /// Include entries are appended as-is. One that repeats a product
    /// combination yields a second job with the same identity; both run.
    pub fn expand(&self, workflow: &WorkflowDefinition) -> Result<Vec<JobSpec>> {
        self.validate(workflow)?;
        let steps = self.resolve_steps(workflow)?;

        let mut jobs = Vec::new();
        for attributes in self.product(workflow) {
            jobs.push(self.job(workflow, attributes, workflow.role, &steps)?);
        }
        for (index, include) in workflow.matrix.include.iter().enumerate() {
            let (attributes, role) = self.include_attributes(workflow, index, include)?;
            jobs.push(self.job(workflow, attributes, role, &steps)?);
        }

        debug!(jobs = jobs.len(), "matrix expanded");
        Ok(jobs)
    }

    fn validate(&self, workflow: &WorkflowDefinition) -> Result<()> {
        for (axis, values) in &workflow.matrix.axes {
            if axis == "role" {
                return Err(Error::InvalidWorkflow(
                    "'role' is a reserved attribute and cannot be an axis".to_string(),
                ));
            }
            if values.is_empty() {
                return Err(Error::InvalidWorkflow(format!(
                    "axis '{}' has no values",
                    axis
                )));
            }
        }
        if workflow.steps.is_empty() {
            return Err(Error::InvalidWorkflow(
                "workflow declares no steps".to_string(),
            ));
        }
        for step in &workflow.steps {
            if step.run.trim().is_empty() {
                return Err(Error::InvalidWorkflow(format!(
                    "step '{}' has an empty run command",
                    step.name
                )));
            }
        }
        Ok(())
    }

    /// Parse each step's condition once and check its attribute
    /// references, so every malformed guard surfaces before any job runs.
    fn resolve_steps(&self, workflow: &WorkflowDefinition) -> Result<Vec<StepSpec>> {
        let mut known: HashSet<&str> = workflow
            .matrix
            .axes
            .keys()
            .map(String::as_str)
            .collect();
        known.insert("role");
        for include in &workflow.matrix.include {
            known.extend(include.keys().map(String::as_str));
        }

        let mut steps = Vec::with_capacity(workflow.steps.len());
        for step in &workflow.steps {
            let condition = match &step.condition {
                Some(source) => {
                    let condition = Condition::parse(source)?;
                    for name in condition.references() {
                        if !known.contains(name) {
                            return Err(Error::InvalidWorkflow(format!(
                                "step '{}' references undefined matrix attribute '{}'",
                                step.name, name
                            )));
                        }
                    }
                    Some(condition)
                }
                None => None,
            };
            steps.push(StepSpec {
                name: step.name.clone(),
                run: step.run.clone(),
                condition,
                policy: if step.continue_on_error {
                    FailurePolicy::ContinueOnError
                } else {
                    FailurePolicy::FailFast
                },
                env: step.env.clone(),
                working_directory: step.working_directory.clone(),
                timeout_secs: step.timeout_secs.unwrap_or(workflow.step_timeout_secs),
                cache: step.cache,
                artifact: step.artifact.clone(),
                retry: step.retry,
            });
        }
        Ok(steps)
    }

    /// Cartesian product in axis declaration order; the last declared
    /// axis varies fastest. Zero axes yield a single empty combination.
    fn product(&self, workflow: &WorkflowDefinition) -> Vec<IndexMap<String, String>> {
        let mut combinations: Vec<IndexMap<String, String>> = vec![IndexMap::new()];
        for (axis, values) in &workflow.matrix.axes {
            let mut expanded = Vec::with_capacity(combinations.len() * values.len());
            for combination in &combinations {
                for value in values {
                    let mut next = combination.clone();
                    next.insert(axis.clone(), value.to_string());
                    expanded.push(next);
                }
            }
            combinations = expanded;
        }
        combinations
    }

    fn include_attributes(
        &self,
        workflow: &WorkflowDefinition,
        index: usize,
        include: &IndexMap<String, AxisValue>,
    ) -> Result<(IndexMap<String, String>, JobRole)> {
        let mut role = workflow.role;
        let mut attributes = IndexMap::new();

        // Declared axes first, in axis order, so identities line up with
        // product jobs.
        for axis in workflow.matrix.axes.keys() {
            match include.get(axis) {
                Some(value) => {
                    attributes.insert(axis.clone(), value.to_string());
                }
                None => {
                    return Err(Error::InvalidWorkflow(format!(
                        "include entry {} is missing a value for axis '{}'",
                        index + 1,
                        axis
                    )));
                }
            }
        }

        for (key, value) in include {
            if key == "role" {
                role = value.to_string().parse()?;
            } else if !workflow.matrix.axes.contains_key(key) {
                attributes.insert(key.clone(), value.to_string());
            }
        }

        Ok((attributes, role))
    }

    fn job(
        &self,
        workflow: &WorkflowDefinition,
        attributes: IndexMap<String, String>,
        role: JobRole,
        steps: &[StepSpec],
    ) -> Result<JobSpec> {
        let identity = JobIdentity::new(
            attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        let platform = match attributes.get(&workflow.platform_axis) {
            Some(value) => value.clone(),
            None if role == JobRole::BuildWheel => {
                return Err(Error::InvalidWorkflow(format!(
                    "build-wheel job ({}) has no value for platform axis '{}'",
                    identity, workflow.platform_axis
                )));
            }
            None => "any".to_string(),
        };
        let display_name = if attributes.is_empty() {
            workflow.name.clone()
        } else {
            format!("{} ({})", workflow.name, identity)
        };

        Ok(JobSpec {
            id: JobId::new(),
            identity,
            display_name,
            role,
            platform,
            attributes,
            env: workflow.env.clone(),
            steps: steps.to_vec(),
        })
    }
}

impl Default for MatrixExpander {
    fn default() -> Self {
        Self::new()
    }
}
