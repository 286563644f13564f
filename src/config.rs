//! Configuration for scriptflow.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (SCRIPTFLOW_HOME, SCRIPTFLOW_TIMEOUT_MS, SCRIPTFLOW_MAX_PARALLEL)
//! 2. Config file (.scriptflow/config.yaml)
//! 3. Defaults (~/.scriptflow, 5s timeout, 10 parallel steps)
//!
//! Config file discovery:
//! - Searches current directory and parents for .scriptflow/config.yaml
//! - `home` in the config file is relative to the .scriptflow/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use crate::core::SandboxLimits;
use crate::error::EngineError;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const DEFAULT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_PARALLEL: usize = 10;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    /// Store directory (relative to .scriptflow/)
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub engine: Option<EngineConfig>,
    #[serde(default)]
    pub sandbox: Option<SandboxLimits>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    pub execution_timeout_ms: Option<u64>,
    pub max_parallel: Option<usize>,
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to the store directory
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub engine: EngineSettings,
    pub sandbox: SandboxLimits,
}

/// Execution settings consumed by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub execution_timeout: Duration,
    pub max_parallel: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            execution_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_parallel: DEFAULT_MAX_PARALLEL,
        }
    }
}

impl EngineSettings {
    /// Timeout must be positive and at least one step must be allowed to run
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.execution_timeout.is_zero() {
            return Err(EngineError::Config(
                "execution timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_parallel < 1 {
            return Err(EngineError::Config(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn merge_file(mut self, file: Option<&EngineConfig>) -> Self {
        if let Some(file) = file {
            if let Some(ms) = file.execution_timeout_ms {
                self.execution_timeout = Duration::from_millis(ms);
            }
            if let Some(max) = file.max_parallel {
                self.max_parallel = max;
            }
        }
        self
    }

    /// Apply env overrides; unparsable or out-of-range values are ignored
    fn merge_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("SCRIPTFLOW_TIMEOUT_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => self.execution_timeout = Duration::from_millis(ms),
                _ => warn!(value = %raw, "Ignoring invalid SCRIPTFLOW_TIMEOUT_MS"),
            }
        }
        if let Some(raw) = lookup("SCRIPTFLOW_MAX_PARALLEL") {
            match raw.trim().parse::<usize>() {
                Ok(max) if max >= 1 => self.max_parallel = max,
                _ => warn!(value = %raw, "Ignoring invalid SCRIPTFLOW_MAX_PARALLEL"),
            }
        }
        self
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".scriptflow").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn resolve(
    config_file: Option<PathBuf>,
    file: ConfigFile,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    let home = if let Some(env_home) = lookup("SCRIPTFLOW_HOME") {
        PathBuf::from(env_home)
    } else if let (Some(path), Some(home)) = (config_file.as_ref(), file.home.as_ref()) {
        let dir = path.parent().unwrap_or(Path::new("."));
        resolve_path(dir, home)
    } else {
        dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(".scriptflow")
    };

    // File values are validated strictly; env values were already filtered
    let from_file = EngineSettings::default().merge_file(file.engine.as_ref());
    from_file.validate()?;
    let engine = from_file.merge_env(&lookup);

    Ok(ResolvedConfig {
        home,
        config_file,
        engine,
        sandbox: file.sandbox.unwrap_or_default(),
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let config_file = find_config_file();
    let file = match config_file {
        Some(ref path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    resolve(config_file, file, |key| std::env::var(key).ok())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}
