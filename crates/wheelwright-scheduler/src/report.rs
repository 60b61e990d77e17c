//! Aggregated results of one matrix run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wheelwright_core::ids::RunId;
use wheelwright_core::job::{JobIdentity, JobResult, JobStatus, StepStatus};

/// Everything recorded about one run, keyed by job identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    /// Results in completion order. Duplicate identities from
    /// overlapping product and include jobs stay distinct.
    pub results: Vec<JobResult>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunReport {
    /// True iff every job succeeded. Gates the release pipeline.
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.status.is_succeeded())
    }

    /// Identities of jobs that did not succeed.
    pub fn failed(&self) -> Vec<&JobIdentity> {
        self.results
            .iter()
            .filter(|r| !r.status.is_succeeded())
            .map(|r| &r.identity)
            .collect()
    }

    /// Every result recorded under an identity, duplicates included.
    pub fn results_for(&self, identity: &JobIdentity) -> Vec<&JobResult> {
        self.results
            .iter()
            .filter(|r| &r.identity == identity)
            .collect()
    }

    /// Job and step counts by status.
    pub fn totals(&self) -> RunTotals {
        let mut totals = RunTotals::default();
        for result in &self.results {
            totals.jobs += 1;
            match result.status {
                JobStatus::Succeeded => totals.jobs_succeeded += 1,
                JobStatus::Failed => totals.jobs_failed += 1,
                JobStatus::Cancelled => totals.jobs_cancelled += 1,
            }
            for step in &result.steps {
                totals.steps += 1;
                match step.status {
                    StepStatus::Succeeded => totals.steps_succeeded += 1,
                    StepStatus::Failed => totals.steps_failed += 1,
                    StepStatus::SoftFailed => totals.steps_soft_failed += 1,
                    StepStatus::Skipped(_) => totals.steps_skipped += 1,
                }
            }
        }
        totals
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub jobs: usize,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    pub jobs_cancelled: usize,
    pub steps: usize,
    pub steps_succeeded: usize,
    pub steps_failed: usize,
    pub steps_soft_failed: usize,
    pub steps_skipped: usize,
}
