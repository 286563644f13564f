//! Workflow Integration Tests
//!
//! Sequential chaining, bounded parallel fan-out and partial failures.

use std::sync::Arc;
use std::time::{Duration, Instant};

use scriptflow::core::{
    InputRef, Orchestrator, PluginRegistry, SandboxExecutor, SandboxLimits, Step, TaskDefinition,
};
use scriptflow::domain::{RunStatus, StepFailure, StepOutcome};
use serde_json::json;

const NORMALIZE: &str = r#"
let factor = params.factor.to_float();
let out = [];
for x in input { out.push(x.to_float() / factor); }
out
"#;

const THRESHOLD: &str = r#"
let limit = params.limit;
let out = [];
for x in input {
    if x >= limit { out.push(0.0); } else { out.push(x); }
}
out
"#;

const SLEEP: &str = r#"
let start = timestamp();
while start.elapsed < params.seconds { }
input
"#;

fn setup(max_parallel: usize) -> (Arc<PluginRegistry>, Orchestrator) {
    let registry = Arc::new(PluginRegistry::default());
    let executor = Arc::new(SandboxExecutor::new(
        SandboxLimits::default(),
        Duration::from_secs(5),
    ));
    let orchestrator = Orchestrator::new(Arc::clone(&registry), executor, max_parallel);

    registry.register("normalize", "Normalize array by factor", NORMALIZE).unwrap();
    registry.register("threshold", "Zero values at or above a limit", THRESHOLD).unwrap();
    registry.register("inc", "", "input + 1").unwrap();
    registry.register("echo", "", "input").unwrap();
    registry.register("fail", "", r#"throw "step exploded""#).unwrap();
    registry.register("sleep", "", SLEEP).unwrap();

    (registry, orchestrator)
}

#[tokio::test]
async fn test_single_plugin_normalize() {
    let (_registry, orch) = setup(2);

    let output = orch
        .execute_plugin("normalize", json!([23, 25, 24]), json!({ "factor": 100 }), None)
        .await
        .unwrap();

    assert_eq!(output, json!([0.23, 0.25, 0.24]));
}

#[tokio::test]
async fn test_execution_is_deterministic() {
    let (_registry, orch) = setup(2);

    let first = orch
        .execute_plugin("normalize", json!([1, 2, 3]), json!({ "factor": 4 }), None)
        .await
        .unwrap();
    let second = orch
        .execute_plugin("normalize", json!([1, 2, 3]), json!({ "factor": 4 }), None)
        .await
        .unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_sandboxes_share_no_bindings() {
    let (registry, orch) = setup(1);
    registry.register("define", "", "let secret = 42; secret").unwrap();
    registry.register("peek", "", "secret").unwrap();

    assert_eq!(
        orch.execute_plugin("define", json!(null), json!({}), None).await.unwrap(),
        json!(42)
    );
    assert!(orch
        .execute_plugin("peek", json!(null), json!({}), None)
        .await
        .is_err());
}

#[tokio::test]
async fn test_sequential_chain_applies_steps_in_order() {
    let (_registry, orch) = setup(2);
    let task = TaskDefinition::new(
        "normalize-then-threshold",
        vec![
            Step::new("normalize").with_param("factor", json!(100)),
            Step::new("threshold").with_param("limit", json!(0.5)),
        ],
        false,
    );

    let report = orch.run_workflow(&task, json!([23, 60, 24])).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(
        report.outcome("step_0"),
        Some(&StepOutcome::Ok(json!([0.23, 0.6, 0.24])))
    );
    // Applied to the raw input the threshold would zero everything
    assert_eq!(
        report.outcome("step_1"),
        Some(&StepOutcome::Ok(json!([0.23, 0.0, 0.24])))
    );
}

#[tokio::test]
async fn test_sequential_input_is_previous_output() {
    let (_registry, orch) = setup(2);
    let task = TaskDefinition::new(
        "increments",
        vec![Step::new("inc"), Step::new("inc"), Step::new("inc"), Step::new("echo")],
        false,
    );

    let report = orch.run_workflow(&task, json!(1)).await.unwrap();

    assert_eq!(report.outcome("step_0").and_then(|o| o.value()), Some(&json!(2)));
    assert_eq!(report.outcome("step_1").and_then(|o| o.value()), Some(&json!(3)));
    assert_eq!(report.outcome("step_2").and_then(|o| o.value()), Some(&json!(4)));
    assert_eq!(report.outcome("step_3").and_then(|o| o.value()), Some(&json!(4)));
}

#[tokio::test]
async fn test_sequential_error_halts_chain() {
    let (_registry, orch) = setup(2);
    let task = TaskDefinition::new(
        "halting",
        vec![
            Step::new("inc").named("first"),
            Step::new("fail").named("second"),
            Step::new("inc").named("third"),
        ],
        false,
    );

    let report = orch.run_workflow(&task, json!(1)).await.unwrap();

    assert_eq!(report.status, RunStatus::CompletedWithErrors);
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.outcome("first"), Some(&StepOutcome::Ok(json!(2))));
    match report.outcome("second") {
        Some(StepOutcome::Err(StepFailure::Runtime { message })) => {
            assert!(message.contains("step exploded"))
        }
        other => panic!("Expected runtime failure, got {:?}", other),
    }
    assert!(report.outcome("third").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_steps_see_initial_input() {
    let (_registry, orch) = setup(3);
    let steps = (0..6)
        .map(|i| Step::new(if i % 2 == 0 { "inc" } else { "echo" }))
        .collect();
    let task = TaskDefinition::new("fan-out", steps, true);

    let report = orch.run_workflow(&task, json!(10)).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.results.len(), 6);
    for i in 0..6 {
        let expected = if i % 2 == 0 { json!(11) } else { json!(10) };
        assert_eq!(
            report.outcome(&format!("step_{}", i)),
            Some(&StepOutcome::Ok(expected))
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_concurrency_is_bounded() {
    let (_registry, orch) = setup(2);
    let steps = (0..5)
        .map(|i| {
            Step::new("sleep")
                .named(format!("sleep_{}", i))
                .with_param("seconds", json!(0.1))
        })
        .collect();
    let task = TaskDefinition::new("bounded", steps, true);

    let start = Instant::now();
    let report = orch.run_workflow(&task, json!("payload")).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.results.len(), 5);
    // Three batches of at most two, but not fully serialized
    assert!(elapsed >= Duration::from_millis(300), "took {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(500), "took {:?}", elapsed);
    assert_eq!(orch.gauge().peak(), 2);
    assert_eq!(orch.gauge().current(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_deleted_plugin_is_isolated() {
    let (registry, orch) = setup(4);
    registry.register("doomed", "", "input").unwrap();
    registry.remove("doomed").unwrap();

    let task = TaskDefinition::new(
        "partial",
        vec![
            Step::new("inc").named("a"),
            Step::new("doomed").named("b"),
            Step::new("echo").named("c"),
        ],
        true,
    );

    let report = orch.run_workflow(&task, json!(1)).await.unwrap();

    assert_eq!(report.status, RunStatus::CompletedWithErrors);
    assert_eq!(report.outcome("a"), Some(&StepOutcome::Ok(json!(2))));
    assert_eq!(
        report.outcome("b"),
        Some(&StepOutcome::Err(StepFailure::PluginNotFound {
            plugin: "doomed".to_string()
        }))
    );
    assert_eq!(report.outcome("c"), Some(&StepOutcome::Ok(json!(1))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_failures_do_not_leak_capacity() {
    let (_registry, orch) = setup(1);
    let steps = vec![
        Step::new("fail").named("boom_1"),
        Step::new("fail").named("boom_2"),
        Step::new("inc").named("ok"),
    ];
    let task = TaskDefinition::new("leaky", steps, true);

    let report = orch.run_workflow(&task, json!(1)).await.unwrap();

    assert_eq!(report.status, RunStatus::CompletedWithErrors);
    assert_eq!(report.outcome("ok"), Some(&StepOutcome::Ok(json!(2))));
    assert!(report.outcome("boom_1").unwrap().is_err());
    assert!(report.outcome("boom_2").unwrap().is_err());
}

#[tokio::test]
async fn test_colliding_step_names_keep_one_outcome() {
    let (_registry, orch) = setup(2);
    let task = TaskDefinition::new(
        "collide",
        vec![Step::new("inc").named("same"), Step::new("inc").named("same")],
        false,
    );

    let report = orch.run_workflow(&task, json!(1)).await.unwrap();

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.outcome("same"), Some(&StepOutcome::Ok(json!(3))));
}

#[tokio::test]
async fn test_yaml_task_end_to_end() {
    let (_registry, orch) = setup(2);
    let task = TaskDefinition::from_yaml(
        r#"
name: yaml
steps:
  - name: normalized
    plugin: normalize
    params: { factor: 10 }
    input: { value: [5, 10] }
  - name: missing_plugin
    params: {}
"#,
    )
    .unwrap();

    let initial = match task.initial_input_ref() {
        Some(InputRef::Inline { value }) => value.clone(),
        other => panic!("Unexpected input ref: {:?}", other),
    };
    let report = orch.run_workflow(&task, initial).await.unwrap();

    assert_eq!(report.outcome("normalized"), Some(&StepOutcome::Ok(json!([0.5, 1.0]))));
    assert!(matches!(
        report.outcome("missing_plugin"),
        Some(StepOutcome::Err(StepFailure::InvalidStepDefinition { .. }))
    ));
    assert_eq!(report.status, RunStatus::CompletedWithErrors);
}
