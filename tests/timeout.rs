//! Timeout Integration Tests
//!
//! Runaway scripts must return a timeout no earlier than the limit and
//! shortly after it, and must not poison later runs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use scriptflow::core::{Orchestrator, PluginRegistry, SandboxExecutor, SandboxLimits, Step, TaskDefinition};
use scriptflow::domain::{RunStatus, StepFailure, StepOutcome};
use scriptflow::ExecutionError;
use serde_json::json;

const SLACK: Duration = Duration::from_millis(500);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_infinite_loop_times_out_within_bounds() {
    let registry = PluginRegistry::default();
    let plugin = registry.register("forever", "", "loop { }").unwrap();
    let executor = SandboxExecutor::new(SandboxLimits::default(), Duration::from_secs(5));
    let limit = Duration::from_millis(200);

    let start = Instant::now();
    let result = executor.run(plugin, json!(null), json!({}), limit).await;
    let elapsed = start.elapsed();

    assert_eq!(result, Err(ExecutionError::Timeout(limit)));
    assert!(elapsed >= limit, "returned early after {:?}", elapsed);
    assert!(elapsed < limit + SLACK, "returned late after {:?}", elapsed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_executor_usable_after_timeout() {
    let registry = PluginRegistry::default();
    let forever = registry.register("forever", "", "let n = 0; loop { n += 1; }").unwrap();
    let quick = registry.register("quick", "", "input * 2").unwrap();
    let executor = SandboxExecutor::new(SandboxLimits::default(), Duration::from_millis(100));

    for _ in 0..3 {
        let result = executor.run_default(Arc::clone(&forever), json!(null), json!({})).await;
        assert!(matches!(result, Err(ExecutionError::Timeout(_))));
    }

    let output = executor.run_default(quick, json!(21), json!({})).await.unwrap();
    assert_eq!(output, json!(42));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fast_script_is_not_delayed_by_timeout() {
    let registry = PluginRegistry::default();
    let plugin = registry.register("fast", "", "input").unwrap();
    let executor = SandboxExecutor::new(SandboxLimits::default(), Duration::from_secs(10));

    let start = Instant::now();
    let output = executor.run_default(plugin, json!("x"), json!({})).await.unwrap();

    assert_eq!(output, json!("x"));
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeout_is_recorded_as_step_outcome() {
    let registry = Arc::new(PluginRegistry::default());
    registry.register("forever", "", "loop { }").unwrap();
    registry.register("echo", "", "input").unwrap();
    let executor = Arc::new(SandboxExecutor::new(
        SandboxLimits::default(),
        Duration::from_millis(150),
    ));
    let orch = Orchestrator::new(registry, executor, 2);

    let task = TaskDefinition::new(
        "stuck",
        vec![Step::new("forever").named("stuck"), Step::new("echo").named("after")],
        false,
    );
    let report = orch.run_workflow(&task, json!(1)).await.unwrap();

    assert_eq!(report.status, RunStatus::CompletedWithErrors);
    assert_eq!(
        report.outcome("stuck"),
        Some(&StepOutcome::Err(StepFailure::Timeout { timeout_ms: 150 }))
    );
    assert!(report.outcome("after").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_parallel_timeout_does_not_block_siblings() {
    let registry = Arc::new(PluginRegistry::default());
    registry.register("forever", "", "loop { }").unwrap();
    registry.register("echo", "", "input").unwrap();
    let executor = Arc::new(SandboxExecutor::new(
        SandboxLimits::default(),
        Duration::from_millis(150),
    ));
    let orch = Orchestrator::new(registry, executor, 1);

    let task = TaskDefinition::new(
        "mixed",
        vec![Step::new("forever").named("stuck"), Step::new("echo").named("fine")],
        true,
    );
    let report = orch.run_workflow(&task, json!("in")).await.unwrap();

    assert_eq!(report.status, RunStatus::CompletedWithErrors);
    assert_eq!(report.outcome("fine"), Some(&StepOutcome::Ok(json!("in"))));
    assert!(matches!(
        report.outcome("stuck"),
        Some(StepOutcome::Err(StepFailure::Timeout { .. }))
    ));
}
