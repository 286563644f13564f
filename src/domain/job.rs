//! Data jobs.
//!
//! A Job holds uploaded input data and, once processed, the per-step
//! results of the orchestration run that consumed it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::outcome::{RunStatus, StepResults};

/// A data job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,

    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Data the job was created with
    pub input_data: Value,

    pub status: JobStatus,

    /// Status of the run that produced `results`, if one ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_status: Option<RunStatus>,

    #[serde(default)]
    pub results: StepResults,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A freshly uploaded job
    pub fn uploaded(input_data: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: format!("Job-{}", now.timestamp()),
            description: "Uploaded data job".to_string(),
            input_data,
            status: JobStatus::Uploaded,
            run_status: None,
            results: StepResults::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A job created for a task submission, before it runs
    pub fn for_task(name: impl Into<String>, description: impl Into<String>, input_data: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            status: JobStatus::Processing,
            run_status: Some(RunStatus::Running),
            ..Self::uploaded(input_data)
        }
    }

    /// Record the results of a finished run
    pub fn apply_results(&mut self, results: StepResults, run_status: RunStatus) {
        self.status = JobStatus::from(run_status);
        self.run_status = Some(run_status);
        self.results = results;
        self.updated_at = Utc::now();
    }

    /// Record a run that failed before any step executed
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.run_status = Some(RunStatus::Failed);
        self.error = Some(error.into());
        self.updated_at = Utc::now();
    }
}

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Uploaded,
    Processing,
    Processed,
    Failed,
}

impl From<RunStatus> for JobStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Pending | RunStatus::Running => Self::Processing,
            RunStatus::Completed | RunStatus::CompletedWithErrors => Self::Processed,
            RunStatus::Failed => Self::Failed,
        }
    }
}
