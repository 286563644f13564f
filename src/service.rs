//! Service facade.
//!
//! Ties the registry, executor and orchestrator to the persistence layer and
//! exposes the operations a transport (the CLI here) calls: plugin
//! management, single-plugin execution, workflow runs and data jobs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{EngineSettings, ResolvedConfig};
use crate::core::{
    InputRef, Orchestrator, PluginRegistry, SandboxExecutor, SandboxLimits, TaskDefinition,
    WorkflowReport,
};
use crate::domain::{
    normalize_name, Job, PluginInfo, PluginRecord, RunStatus, StepOutcome, StepResults,
};
use crate::error::EngineError;
use crate::store::{JobStore, PluginStore, StoreError};

/// One plugin call in an ad-hoc processing chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInvocation {
    pub name: String,

    #[serde(default)]
    pub params: Map<String, Value>,
}

/// Result of loading plugins from the store at startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    /// Names whose stored source failed to compile
    pub skipped: Vec<String>,
}

/// Outcome of a task submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub job_id: Uuid,
    pub report: WorkflowReport,
}

/// Application service over a plugin store and a job store
pub struct Service {
    plugins: Arc<dyn PluginStore>,
    jobs: Arc<dyn JobStore>,
    registry: Arc<PluginRegistry>,
    orchestrator: Orchestrator,
    /// Serializes persist+install so the store and the registry agree on the winner
    registration: Mutex<()>,
}

impl Service {
    pub fn new(
        settings: &EngineSettings,
        limits: SandboxLimits,
        plugins: Arc<dyn PluginStore>,
        jobs: Arc<dyn JobStore>,
    ) -> Result<Self, EngineError> {
        settings.validate()?;

        let registry = Arc::new(PluginRegistry::new(limits.clone()));
        let executor = Arc::new(SandboxExecutor::new(limits, settings.execution_timeout));
        let orchestrator = Orchestrator::new(Arc::clone(&registry), executor, settings.max_parallel);

        Ok(Self {
            plugins,
            jobs,
            registry,
            orchestrator,
            registration: Mutex::new(()),
        })
    }

    /// Build from resolved configuration with one store serving both roles
    pub fn from_config<S>(config: &ResolvedConfig, store: Arc<S>) -> Result<Self, EngineError>
    where
        S: PluginStore + JobStore + 'static,
    {
        Self::new(
            &config.engine,
            config.sandbox.clone(),
            store.clone(),
            store,
        )
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Populate the registry from the store
    #[instrument(skip(self))]
    pub async fn load_plugins(&self) -> Result<LoadReport, EngineError> {
        let mut report = LoadReport::default();

        for record in self.plugins.list_plugins().await? {
            match self.registry.register(&record.name, &record.description, &record.source) {
                Ok(_) => report.loaded += 1,
                Err(err) => {
                    error!(plugin = %record.name, error = %err, "Skipping plugin that fails to compile");
                    report.skipped.push(record.name);
                }
            }
        }

        info!(loaded = report.loaded, skipped = report.skipped.len(), "Plugins loaded");
        Ok(report)
    }

    /// Compile, persist, then install. Nothing changes if any stage fails.
    #[instrument(skip(self, description, source))]
    pub async fn register_plugin(
        &self,
        name: &str,
        description: &str,
        source: &str,
    ) -> Result<PluginInfo, EngineError> {
        let name = normalize_name(name).ok_or_else(|| EngineError::InvalidPluginName(name.to_string()))?;
        let compiled = self.registry.compile(&name, source)?;

        let _registration = self.registration.lock().await;
        self.plugins
            .save_or_replace_plugin(&PluginRecord::new(name.as_str(), description, source))
            .await?;

        let plugin = self.registry.install(&name, description, compiled)?;
        Ok(plugin.info())
    }

    pub async fn plugin_source(&self, name: &str) -> Result<String, EngineError> {
        self.plugins
            .load_plugin_source(name)
            .await
            .map_err(|err| not_found_as_plugin(err, name))
    }

    pub async fn list_plugins(&self) -> Result<Vec<PluginInfo>, EngineError> {
        let records = self.plugins.list_plugins().await?;
        Ok(records.iter().map(PluginRecord::info).collect())
    }

    /// Remove from the store and the registry; NotFound only if neither had it
    #[instrument(skip(self))]
    pub async fn remove_plugin(&self, name: &str) -> Result<(), EngineError> {
        let stored = match self.plugins.delete_plugin(name).await {
            Ok(()) => true,
            Err(err) if err.is_not_found() => false,
            Err(err) => return Err(err.into()),
        };
        let cached = self.registry.remove(name).is_ok();

        if stored || cached {
            info!(plugin = %name.trim(), "Plugin deleted");
            Ok(())
        } else {
            Err(EngineError::PluginNotFound {
                name: name.trim().to_string(),
            })
        }
    }

    pub async fn execute_plugin(
        &self,
        name: &str,
        input: Value,
        params: Value,
    ) -> Result<Value, EngineError> {
        self.orchestrator.execute_plugin(name, input, params, None).await
    }

    pub async fn run_workflow(
        &self,
        task: &TaskDefinition,
        initial_input: Value,
    ) -> Result<WorkflowReport, EngineError> {
        self.orchestrator.run_workflow(task, initial_input).await
    }

    /// Store uploaded data as a new job
    pub async fn upload_data(&self, input: Value) -> Result<Job, EngineError> {
        let job = Job::uploaded(input);
        self.jobs.save_job(&job).await?;
        info!(job_id = %job.id, "Data uploaded");
        Ok(job)
    }

    /// Chain plugins over an uploaded job's input and record the results on the job.
    ///
    /// A missing or failing plugin records its error and the chain carries on
    /// with the last good value. An empty list still marks the job processed.
    #[instrument(skip(self, invocations), fields(plugins = invocations.len()))]
    pub async fn process_job(
        &self,
        job_id: Uuid,
        invocations: &[PluginInvocation],
    ) -> Result<WorkflowReport, EngineError> {
        let mut current = self
            .jobs
            .load_job_input(job_id)
            .await
            .map_err(|err| structural_if_missing(err, "job not found"))?;

        let mut results = StepResults::new();
        for call in invocations {
            let key = call.name.trim().to_string();
            let params = Value::Object(call.params.clone());

            match self.orchestrator.run_plugin(&key, current.clone(), params, None).await {
                Ok(output) => {
                    results.insert(key, StepOutcome::Ok(output.clone()));
                    current = output;
                }
                Err(failure) => {
                    warn!(plugin = %key, error = %failure, "Plugin failed, keeping last good value");
                    results.insert(key, StepOutcome::Err(failure));
                }
            }
        }

        let status = RunStatus::from_results(&results);
        self.jobs
            .update_job_results(job_id, &results, status)
            .await?;
        info!(?status, "Job processed");

        Ok(WorkflowReport { results, status })
    }

    /// Persist a task, resolve its input, run it and store the results as a new job
    #[instrument(skip(self, task, explicit_input), fields(task = %task.name))]
    pub async fn submit_task(
        &self,
        task: &TaskDefinition,
        explicit_input: Option<Value>,
    ) -> Result<TaskSubmission, EngineError> {
        task.validate()?;
        self.jobs.save_task(task).await?;

        for step in task.ignored_input_refs() {
            warn!(step = %step, "Input reference on a later step is ignored");
        }

        let input = match task.initial_input_ref() {
            Some(reference) => self.resolve_input(reference).await?,
            None => explicit_input.unwrap_or(Value::Null),
        };

        let mut job = Job::for_task(task.name.as_str(), task.description.as_str(), input.clone());
        let report = match self.orchestrator.run_workflow(task, input).await {
            Ok(report) => report,
            Err(err) => {
                job.mark_failed(err.to_string());
                self.jobs.save_job(&job).await?;
                return Err(err);
            }
        };
        job.apply_results(report.results.clone(), report.status);
        let job_id = self.jobs.save_job(&job).await?;

        Ok(TaskSubmission { job_id, report })
    }

    async fn resolve_input(&self, reference: &InputRef) -> Result<Value, EngineError> {
        match reference {
            InputRef::Inline { value } => Ok(value.clone()),
            InputRef::Job { job_id } => {
                let id = parse_job_id(job_id)?;
                self.jobs
                    .load_job_input(id)
                    .await
                    .map_err(|err| structural_if_missing(err, "referenced job not found"))
            }
            InputRef::JobOutput { job_id, step } => {
                let id = parse_job_id(job_id)?;
                let job = self
                    .jobs
                    .get_job(id)
                    .await
                    .map_err(|err| structural_if_missing(err, "referenced job not found"))?;

                job.results
                    .get(step)
                    .and_then(|outcome| outcome.value())
                    .cloned()
                    .ok_or_else(|| {
                        EngineError::structural(format!(
                            "referenced job {} has no successful output for step '{}'",
                            id, step
                        ))
                    })
            }
        }
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Job, EngineError> {
        Ok(self.jobs.get_job(id).await?)
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>, EngineError> {
        Ok(self.jobs.list_jobs().await?)
    }
}

fn parse_job_id(raw: &str) -> Result<Uuid, EngineError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| EngineError::structural(format!("invalid job ID in input reference: {}", raw)))
}

fn structural_if_missing(err: StoreError, message: &str) -> EngineError {
    if err.is_not_found() {
        EngineError::structural(format!("{}: {}", message, err))
    } else {
        err.into()
    }
}

fn not_found_as_plugin(err: StoreError, name: &str) -> EngineError {
    if err.is_not_found() {
        EngineError::PluginNotFound {
            name: name.trim().to_string(),
        }
    } else {
        err.into()
    }
}
