//! Command-line interface for scriptflow.
//!
//! Provides commands for managing plugins, uploading data, processing jobs
//! and running task files.

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::config;
use crate::core::TaskDefinition;
use crate::domain::RunStatus;
use crate::service::{PluginInvocation, Service};
use crate::store::FileStore;

/// scriptflow - Sandboxed script plugins and workflows
#[derive(Parser, Debug)]
#[command(name = "scriptflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage plugins
    Plugin {
        #[command(subcommand)]
        command: PluginCommands,
    },

    /// Upload JSON data as a new job
    Upload {
        /// Input file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Chain plugins over an uploaded job and store the results on it
    Process {
        /// Job ID (UUID)
        job_id: String,

        /// JSON array of {"name": ..., "params": {...}}
        #[arg(short, long)]
        plugins: String,
    },

    /// Run a task file (YAML or JSON) and store the results as a new job
    Task {
        /// Task definition file
        file: PathBuf,

        /// Initial input file, used when the task has no input reference
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// List jobs
    Jobs {
        /// Maximum number of jobs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show a job
    Job {
        /// Job ID (UUID)
        job_id: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Subcommand, Debug)]
pub enum PluginCommands {
    /// Register or replace a plugin
    Add {
        /// Plugin name
        name: String,

        /// Script file
        #[arg(short, long)]
        file: PathBuf,

        #[arg(short, long, default_value = "")]
        description: String,
    },

    /// List stored plugins
    List,

    /// Print a plugin's source
    Show { name: String },

    /// Delete a plugin
    Rm { name: String },

    /// Run a single plugin
    Exec {
        name: String,

        /// Input file (reads from stdin if neither this nor --data is given)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Inline JSON input
        #[arg(long, conflicts_with = "input")]
        data: Option<String>,

        /// JSON object of parameters
        #[arg(short, long, default_value = "{}")]
        params: String,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Plugin { command } => execute_plugin(command).await,
            Commands::Upload { input } => upload(input).await,
            Commands::Process { job_id, plugins } => process(&job_id, &plugins).await,
            Commands::Task { file, input } => run_task(file, input).await,
            Commands::Jobs { limit } => list_jobs(limit).await,
            Commands::Job { job_id } => show_job(&job_id).await,
            Commands::Config => show_config(),
        }
    }
}

/// Open the store, build the service and load plugins into the registry
async fn open_service() -> Result<Service> {
    let cfg = config::config()?;
    let store = FileStore::open(&cfg.home)
        .await
        .with_context(|| format!("Failed to open store at {}", cfg.home.display()))?;

    let service = Service::from_config(cfg, Arc::new(store))?;
    let report = service.load_plugins().await?;
    if !report.skipped.is_empty() {
        eprintln!(
            "[warning: {} stored plugin(s) failed to compile: {}]",
            report.skipped.len(),
            report.skipped.join(", ")
        );
    }
    Ok(service)
}

async fn execute_plugin(command: PluginCommands) -> Result<()> {
    let service = open_service().await?;

    match command {
        PluginCommands::Add {
            name,
            file,
            description,
        } => {
            let source = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read script file: {}", file.display()))?;
            let info = service.register_plugin(&name, &description, &source).await?;
            eprintln!("[Plugin '{}' registered ({})]", info.name, info.source_hash.unwrap_or_default());
        }
        PluginCommands::List => {
            let plugins = service.list_plugins().await?;
            if plugins.is_empty() {
                println!("No plugins registered.");
            }
            for plugin in plugins {
                println!("{:<24} {}", plugin.name, plugin.description);
            }
        }
        PluginCommands::Show { name } => {
            println!("{}", service.plugin_source(&name).await?);
        }
        PluginCommands::Rm { name } => {
            service.remove_plugin(&name).await?;
            eprintln!("[Plugin '{}' deleted]", name.trim());
        }
        PluginCommands::Exec {
            name,
            input,
            data,
            params,
        } => {
            let input = match data {
                Some(inline) => parse_json(&inline, "--data")?,
                None => read_json_input(input)?,
            };
            let params = parse_json(&params, "--params")?;
            let output = service.execute_plugin(&name, input, params).await?;
            print_json(&output)?;
        }
    }

    Ok(())
}

async fn upload(input: Option<PathBuf>) -> Result<()> {
    let service = open_service().await?;
    let data = read_json_input(input)?;
    let job = service.upload_data(data).await?;

    println!("{}", job.id);
    eprintln!("[Data uploaded as {}]", job.name);
    Ok(())
}

async fn process(job_id: &str, plugins: &str) -> Result<()> {
    let job_id = parse_uuid(job_id)?;
    let invocations: Vec<PluginInvocation> =
        serde_json::from_str(plugins).context("--plugins must be a JSON array of {name, params}")?;

    let service = open_service().await?;
    let report = service.process_job(job_id, &invocations).await?;

    print_json(&report.results)?;
    report_status(report.status);
    Ok(())
}

async fn run_task(file: PathBuf, input: Option<PathBuf>) -> Result<()> {
    let task = TaskDefinition::from_file(&file)?;
    let explicit_input = match input {
        Some(path) => Some(read_json_input(Some(path))?),
        None => None,
    };

    let service = open_service().await?;
    let submission = service.submit_task(&task, explicit_input).await?;

    print_json(&submission.report.results)?;
    eprintln!("[Job {}]", submission.job_id);
    report_status(submission.report.status);
    Ok(())
}

async fn list_jobs(limit: usize) -> Result<()> {
    let service = open_service().await?;
    let jobs = service.list_jobs().await?;

    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!("{:<38} {:<12} {:<24} NAME", "ID", "STATUS", "CREATED");
    for job in jobs.into_iter().take(limit) {
        println!(
            "{:<38} {:<12} {:<24} {}",
            job.id,
            format!("{:?}", job.status).to_lowercase(),
            job.created_at.format("%Y-%m-%d %H:%M:%S"),
            job.name
        );
    }

    Ok(())
}

async fn show_job(job_id: &str) -> Result<()> {
    let id = parse_uuid(job_id)?;
    let service = open_service().await?;
    print_json(&service.get_job(id).await?)
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Home (store):      {}", cfg.home.display());
    println!("Execution timeout: {:?}", cfg.engine.execution_timeout);
    println!("Max parallel:      {}", cfg.engine.max_parallel);
    println!("Sandbox limits:    {:?}", cfg.sandbox);

    Ok(())
}

fn report_status(status: RunStatus) {
    match status {
        RunStatus::Completed => eprintln!("[Completed]"),
        RunStatus::CompletedWithErrors => eprintln!("[Completed with errors]"),
        other => eprintln!("[Run in state: {:?}]", other),
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).with_context(|| format!("Invalid job ID: {}", raw))
}

fn parse_json(raw: &str, what: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("{} is not valid JSON", what))
}

/// Read JSON from a file, or from stdin when no file is given
fn read_json_input(path: Option<PathBuf>) -> Result<Value> {
    let content = match path {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read from stdin")?;
            buffer
        }
    };

    if content.trim().is_empty() {
        anyhow::bail!("Input is empty");
    }

    serde_json::from_str(&content).context("Input is not valid JSON")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_task_command() {
        let cli = Cli::try_parse_from(["scriptflow", "task", "flow.yaml", "--input", "data.json"])
            .unwrap();
        match cli.command {
            Commands::Task { file, input } => {
                assert_eq!(file, PathBuf::from("flow.yaml"));
                assert_eq!(input, Some(PathBuf::from("data.json")));
            }
            other => panic!("Unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_exec_data_conflicts_with_input() {
        let result = Cli::try_parse_from([
            "scriptflow", "plugin", "exec", "p", "--input", "a.json", "--data", "[1]",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_json_errors() {
        assert!(parse_json("{", "--params").is_err());
        assert_eq!(parse_json("[1]", "--data").unwrap(), serde_json::json!([1]));
    }
}
