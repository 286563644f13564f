//! Error taxonomy for the engine.
//!
//! Step-level failures (`StepFailure`) are captured into a step's outcome
//! and never abort sibling steps. Everything else in `EngineError` aborts
//! the request and is reported to the caller.

use std::time::Duration;

use thiserror::Error;

use crate::domain::StepFailure;
use crate::store::StoreError;

/// Errors returned by the registry, executor, orchestrator and service
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to compile plugin '{name}': {message}")]
    Compile { name: String, message: String },

    #[error("Invalid plugin name: {0:?}")]
    InvalidPluginName(String),

    #[error("Plugin '{name}' not found")]
    PluginNotFound { name: String },

    #[error("Invalid step definition '{step}': {reason}")]
    InvalidStepDefinition { step: String, reason: String },

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Structural error: {0}")]
    Structural(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    pub fn structural(message: impl Into<String>) -> Self {
        Self::Structural(message.into())
    }
}

/// Failure of a single sandboxed script run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("Script error: {0}")]
    Runtime(String),
}

impl From<ExecutionError> for StepFailure {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::Timeout(limit) => StepFailure::Timeout {
                timeout_ms: limit.as_millis() as u64,
            },
            ExecutionError::Runtime(message) => StepFailure::Runtime { message },
        }
    }
}

impl From<StepFailure> for EngineError {
    fn from(failure: StepFailure) -> Self {
        match failure {
            StepFailure::PluginNotFound { plugin } => Self::PluginNotFound { name: plugin },
            StepFailure::InvalidStepDefinition { step, reason } => {
                Self::InvalidStepDefinition { step, reason }
            }
            StepFailure::Timeout { timeout_ms } => {
                Self::Execution(ExecutionError::Timeout(Duration::from_millis(timeout_ms)))
            }
            StepFailure::Runtime { message } => Self::Execution(ExecutionError::Runtime(message)),
        }
    }
}
