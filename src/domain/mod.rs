//! Domain types for scriptflow.
//!
//! This module contains the core data structures:
//! - Plugin: Persisted script records and metadata
//! - Job: Uploaded data and processing results
//! - Outcome: Per-step results and run status

pub mod job;
pub mod outcome;
pub mod plugin;

// Re-export commonly used types
pub use job::{Job, JobStatus};
pub use outcome::{RunStatus, StepFailure, StepOutcome, StepResults};
pub use plugin::{normalize_name, PluginInfo, PluginRecord};
