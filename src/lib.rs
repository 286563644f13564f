//! scriptflow - Sandboxed script plugins and workflows
//!
//! Stores named transformation scripts, compiles them once and runs them
//! against uploaded data, either one at a time or as multi-step workflows.
//!
//! # Architecture
//!
//! - Plugins are compiled into a shared registry; lookups never wait on a compile
//! - Every run gets a fresh, capability-restricted sandbox with a hard timeout
//! - Workflows chain steps sequentially or fan out with bounded parallelism
//! - Step failures are recorded per step; only malformed tasks abort a run
//!
//! # Modules
//!
//! - `core`: Registry, Sandbox, Task definitions, Orchestrator
//! - `domain`: Data structures (PluginRecord, Job, StepOutcome)
//! - `store`: Persistence interfaces and the file-backed store
//! - `service`: Operations exposed to callers
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Register a plugin
//! scriptflow plugin add normalize --file normalize.rhai
//!
//! # Upload data and run a task over it
//! echo '[23, 25, 24]' | scriptflow upload
//! scriptflow task workflow.yaml
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod service;
pub mod store;

// Re-export main types at crate root for convenience
pub use core::{Orchestrator, PluginRegistry, SandboxExecutor, TaskDefinition, WorkflowReport};
pub use domain::{Job, JobStatus, RunStatus, StepFailure, StepOutcome};
pub use error::{EngineError, ExecutionError};
pub use service::Service;
pub use store::{FileStore, JobStore, PluginStore, StoreError};
