//! Workflow orchestrator.
//!
//! Runs a task's steps either chained (sequential) or fanned out over the
//! same input with at most `max_parallel` steps in flight. Step failures are
//! captured into the result map; only structural problems abort a run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use super::registry::PluginRegistry;
use super::sandbox::SandboxExecutor;
use super::task::{Step, TaskDefinition};
use crate::domain::{RunStatus, StepFailure, StepOutcome, StepResults};
use crate::error::EngineError;

/// Aggregated result of one workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub results: StepResults,
    pub status: RunStatus,
}

impl WorkflowReport {
    pub fn outcome(&self, step: &str) -> Option<&StepOutcome> {
        self.results.get(step)
    }
}

/// Counts step executions currently in flight and the peak seen
#[derive(Debug, Default)]
pub struct ActivityGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ActivityGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one execution as started; it ends when the guard drops
    pub fn enter(self: &Arc<Self>) -> ActivityGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ActivityGuard {
            gauge: Arc::clone(self),
        }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct ActivityGuard {
    gauge: Arc<ActivityGauge>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Main workflow orchestrator
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<PluginRegistry>,
    executor: Arc<SandboxExecutor>,
    max_parallel: usize,
    gauge: Arc<ActivityGauge>,
}

impl Orchestrator {
    /// Create an orchestrator; `max_parallel` is clamped to at least 1
    pub fn new(
        registry: Arc<PluginRegistry>,
        executor: Arc<SandboxExecutor>,
        max_parallel: usize,
    ) -> Self {
        Self {
            registry,
            executor,
            max_parallel: max_parallel.max(1),
            gauge: Arc::new(ActivityGauge::new()),
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// In-flight step counter
    pub fn gauge(&self) -> &Arc<ActivityGauge> {
        &self.gauge
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Run a task against its resolved initial input
    #[instrument(skip(self, task, initial_input), fields(task = %task.name, parallel = task.parallel))]
    pub async fn run_workflow(
        &self,
        task: &TaskDefinition,
        initial_input: Value,
    ) -> Result<WorkflowReport, EngineError> {
        task.validate()?;

        let started = Instant::now();
        info!(steps = task.steps.len(), "Starting workflow");

        let results = if task.parallel {
            self.run_parallel(task, initial_input).await
        } else {
            self.run_sequential(task, initial_input).await
        };

        let status = RunStatus::from_results(&results);
        info!(
            ?status,
            duration_ms = started.elapsed().as_millis() as u64,
            "Workflow finished"
        );

        Ok(WorkflowReport { results, status })
    }

    /// Chain steps: each successful output feeds the next step; stop at the first failure
    async fn run_sequential(&self, task: &TaskDefinition, initial_input: Value) -> StepResults {
        let mut results = StepResults::new();
        let mut current = initial_input;

        for (idx, step) in task.steps.iter().enumerate() {
            let step_name = step.display_name(idx);

            match self.execute_step(idx, step, current.clone()).await {
                Ok(output) => {
                    results.insert(step_name, StepOutcome::Ok(output.clone()));
                    current = output;
                }
                Err(failure) => {
                    warn!(step = %step_name, error = %failure, "Step failed, halting chain");
                    results.insert(step_name, StepOutcome::Err(failure));
                    break;
                }
            }
        }

        results
    }

    /// Fan out: every step sees the same input, admission bounded by a semaphore
    async fn run_parallel(&self, task: &TaskDefinition, initial_input: Value) -> StepResults {
        let gate = Arc::new(Semaphore::new(self.max_parallel));
        let results = Arc::new(Mutex::new(StepResults::new()));
        let input = Arc::new(initial_input);
        let mut workers = JoinSet::new();

        for (idx, step) in task.steps.iter().enumerate() {
            let this = self.clone();
            let step = step.clone();
            let gate = Arc::clone(&gate);
            let results = Arc::clone(&results);
            let input = Arc::clone(&input);

            workers.spawn(async move {
                let step_name = step.display_name(idx);

                let outcome = match gate.acquire_owned().await {
                    Ok(_permit) => this.execute_step(idx, &step, (*input).clone()).await,
                    Err(_) => Err(StepFailure::Runtime {
                        message: "admission gate closed".to_string(),
                    }),
                };

                if let Err(failure) = &outcome {
                    warn!(step = %step_name, error = %failure, "Step failed");
                }

                results
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(step_name, StepOutcome::from(outcome));
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "Step worker panicked");
            }
        }

        let mut guard = results.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *guard)
    }

    /// Resolve and run one step. The plugin is looked up now, not at submission.
    async fn execute_step(&self, idx: usize, step: &Step, input: Value) -> Result<Value, StepFailure> {
        let step_name = step.display_name(idx);
        let plugin_name = step.plugin_ref(idx)?;

        let started = Instant::now();
        debug!(step = %step_name, plugin = %plugin_name, "Executing step");

        let output = self
            .run_plugin(plugin_name, input, step.params_value(), None)
            .await?;

        debug!(
            step = %step_name,
            duration_ms = started.elapsed().as_millis() as u64,
            "Step completed"
        );
        Ok(output)
    }

    /// Look up and run one plugin, reporting failure as a step-level outcome.
    ///
    /// A missing plugin never reaches the executor.
    pub async fn run_plugin(
        &self,
        name: &str,
        input: Value,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, StepFailure> {
        let plugin = self
            .registry
            .lookup(name)
            .map_err(|_| StepFailure::PluginNotFound {
                plugin: name.trim().to_string(),
            })?;

        let timeout = timeout.unwrap_or_else(|| self.executor.default_timeout());
        let _active = self.gauge.enter();
        self.executor
            .run(plugin, input, params, timeout)
            .await
            .map_err(StepFailure::from)
    }

    /// Run a single plugin outside of any workflow
    pub async fn execute_plugin(
        &self,
        name: &str,
        input: Value,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, EngineError> {
        self.run_plugin(name, input, params, timeout)
            .await
            .map_err(EngineError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sandbox::SandboxLimits;
    use serde_json::json;

    fn orchestrator(max_parallel: usize) -> Orchestrator {
        let registry = Arc::new(PluginRegistry::default());
        let executor = Arc::new(SandboxExecutor::new(
            SandboxLimits::default(),
            Duration::from_secs(5),
        ));
        Orchestrator::new(registry, executor, max_parallel)
    }

    #[test]
    fn test_max_parallel_clamped() {
        assert_eq!(orchestrator(0).max_parallel(), 1);
    }

    #[test]
    fn test_gauge_tracks_peak() {
        let gauge = Arc::new(ActivityGauge::new());
        let a = gauge.enter();
        let b = gauge.enter();
        assert_eq!(gauge.current(), 2);
        drop(a);
        drop(b);
        assert_eq!(gauge.current(), 0);
        assert_eq!(gauge.peak(), 2);
    }

    #[tokio::test]
    async fn test_invalid_step_skips_executor() {
        let orch = orchestrator(2);
        let task = TaskDefinition::new("t", vec![Step::default().named("empty")], false);

        let report = orch.run_workflow(&task, json!(null)).await.unwrap();
        assert_eq!(report.status, RunStatus::CompletedWithErrors);
        assert!(matches!(
            report.outcome("empty"),
            Some(StepOutcome::Err(StepFailure::InvalidStepDefinition { .. }))
        ));
        assert_eq!(orch.gauge().peak(), 0);
    }

    #[tokio::test]
    async fn test_structural_error_aborts() {
        let orch = orchestrator(2);
        let task = TaskDefinition::new("t", vec![], true);
        assert!(matches!(
            orch.run_workflow(&task, json!(null)).await,
            Err(EngineError::Structural(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_plugin_not_found() {
        let orch = orchestrator(1);
        let result = orch.execute_plugin("nope", json!(1), json!({}), None).await;
        assert!(matches!(result, Err(EngineError::PluginNotFound { .. })));
    }
}
