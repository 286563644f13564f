//! Core execution logic.
//!
//! This module contains:
//! - Registry: Compiled plugin cache
//! - Sandbox: Isolated, time-bounded script execution
//! - Task: Task definitions and loading
//! - Orchestrator: Sequential and bounded-parallel workflow runs

pub mod orchestrator;
pub mod registry;
pub mod sandbox;
pub mod task;

// Re-export commonly used types
pub use orchestrator::{ActivityGauge, Orchestrator, WorkflowReport};
pub use registry::{CompiledPlugin, CompiledSource, PluginRegistry};
pub use sandbox::{build_engine, SandboxExecutor, SandboxLimits};
pub use task::{InputRef, Step, TaskDefinition};
