//! Task definitions and loading.
//!
//! A task is a flat list of plugin steps run either chained (each step
//! consumes the previous output) or fanned out in parallel over the same
//! input. Tasks are written in YAML or JSON.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::StepFailure;
use crate::error::EngineError;

/// A complete task definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Steps in declared order
    pub steps: Vec<Step>,

    /// Fan out over the same input instead of chaining
    #[serde(default)]
    pub parallel: bool,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<Step>, parallel: bool) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps,
            parallel,
        }
    }

    /// Load a task from a YAML or JSON file (chosen by extension, YAML otherwise)
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read task file: {}", path.display()))?;

        let task = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&content)?,
            _ => Self::from_yaml(&content)?,
        };
        Ok(task)
    }

    /// Parse a task from YAML content
    pub fn from_yaml(content: &str) -> Result<Self, EngineError> {
        serde_yaml::from_str(content)
            .map_err(|err| EngineError::structural(format!("Failed to parse task YAML: {}", err)))
    }

    /// Parse a task from JSON content
    pub fn from_json(content: &str) -> Result<Self, EngineError> {
        serde_json::from_str(content)
            .map_err(|err| EngineError::structural(format!("Failed to parse task JSON: {}", err)))
    }

    /// Structural validation; step-level problems are left to the run
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::structural("Task name cannot be empty"));
        }

        if self.steps.is_empty() {
            return Err(EngineError::structural("Task must have at least one step"));
        }

        Ok(())
    }

    /// Reference that seeds the task's initial input (the first step's `input`)
    pub fn initial_input_ref(&self) -> Option<&InputRef> {
        self.steps.first().and_then(|step| step.input.as_ref())
    }

    /// Names of steps after the first that carry an `input` reference.
    ///
    /// Those references do not affect the run.
    pub fn ignored_input_refs(&self) -> Vec<String> {
        self.steps
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, step)| step.input.is_some())
            .map(|(idx, step)| step.display_name(idx))
            .collect()
    }
}

/// A single step in a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Result key; defaults to `step_{index}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Name of the plugin to run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,

    #[serde(default)]
    pub params: Map<String, Value>,

    /// Where the task's input comes from (first step only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<InputRef>,
}

impl Step {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: Some(plugin.into()),
            ..Default::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_input(mut self, input: InputRef) -> Self {
        self.input = Some(input);
        self
    }

    /// Name used as the result key for the step at `index`
    pub fn display_name(&self, index: usize) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("step_{}", index),
        }
    }

    /// The plugin this step runs, or why it cannot run
    pub fn plugin_ref(&self, index: usize) -> Result<&str, StepFailure> {
        match self.plugin.as_deref().map(str::trim) {
            Some(plugin) if !plugin.is_empty() => Ok(plugin),
            _ => Err(StepFailure::InvalidStepDefinition {
                step: self.display_name(index),
                reason: "plugin name not specified in step".to_string(),
            }),
        }
    }

    pub fn params_value(&self) -> Value {
        Value::Object(self.params.clone())
    }
}

/// Source of a task's initial input
///
/// Supported forms:
/// - Uploaded job data: `input: { job_id: <id> }`
/// - A prior job's step output: `input: { job_id: <id>, step: <name> }`
/// - Inline value: `input: { value: [1, 2, 3] }`
///
/// Mixed shapes such as `{ job_id, value }` are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, deny_unknown_fields)]
pub enum InputRef {
    JobOutput { job_id: String, step: String },

    Job { job_id: String },

    Inline { value: Value },
}
