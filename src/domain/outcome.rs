//! Per-step outcomes and overall run status.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Result map of a workflow run (step name -> outcome)
pub type StepResults = HashMap<String, StepOutcome>;

/// Success-or-error result recorded for one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Ok(Value),
    Err(StepFailure),
}

impl StepOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }

    /// The output value, if the step succeeded
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Ok(value) => Some(value),
            Self::Err(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&StepFailure> {
        match self {
            Self::Ok(_) => None,
            Self::Err(failure) => Some(failure),
        }
    }
}

impl From<Result<Value, StepFailure>> for StepOutcome {
    fn from(result: Result<Value, StepFailure>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(failure) => Self::Err(failure),
        }
    }
}

/// Step-level failure kinds. These are captured, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepFailure {
    #[error("plugin '{plugin}' not found")]
    PluginNotFound { plugin: String },

    #[error("invalid step definition '{step}': {reason}")]
    InvalidStepDefinition { step: String, reason: String },

    #[error("execution timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("{message}")]
    Runtime { message: String },
}

/// State of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,

    Running,

    /// Every executed step succeeded
    Completed,

    /// At least one step failed; the results are still complete and inspectable
    CompletedWithErrors,

    /// Structural problem, no step ran
    Failed,
}

impl RunStatus {
    /// Derive the final status from a finished result map
    pub fn from_results(results: &StepResults) -> Self {
        if results.values().all(StepOutcome::is_ok) {
            Self::Completed
        } else {
            Self::CompletedWithErrors
        }
    }
}
