//! Persistence interfaces.
//!
//! The engine only needs a narrow slice of a document store: plugin
//! sources, job input and job results. These traits describe that slice;
//! [`FileStore`] is the on-disk implementation used by the binary.

pub mod file;

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::core::TaskDefinition;
use crate::domain::{Job, PluginRecord, RunStatus, StepResults};

pub use file::FileStore;

/// Errors surfaced (never retried) from the store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to acquire store lock: {0}")]
    Lock(String),
}

impl StoreError {
    pub fn plugin_not_found(name: &str) -> Self {
        Self::NotFound {
            kind: "plugin",
            id: name.to_string(),
        }
    }

    pub fn job_not_found(id: Uuid) -> Self {
        Self::NotFound {
            kind: "job",
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Plugin source storage
#[async_trait]
pub trait PluginStore: Send + Sync {
    async fn load_plugin_source(&self, name: &str) -> Result<String, StoreError>;

    async fn save_or_replace_plugin(&self, record: &PluginRecord) -> Result<(), StoreError>;

    async fn delete_plugin(&self, name: &str) -> Result<(), StoreError>;

    /// Every stored plugin, in backing-store order
    async fn list_plugins(&self) -> Result<Vec<PluginRecord>, StoreError>;
}

/// Job and task storage
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load_job_input(&self, id: Uuid) -> Result<Value, StoreError>;

    async fn get_job(&self, id: Uuid) -> Result<Job, StoreError>;

    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError>;

    async fn save_job(&self, job: &Job) -> Result<Uuid, StoreError>;

    async fn update_job_results(
        &self,
        id: Uuid,
        results: &StepResults,
        status: RunStatus,
    ) -> Result<(), StoreError>;

    /// Keep a copy of a submitted task definition
    async fn save_task(&self, task: &TaskDefinition) -> Result<Uuid, StoreError>;
}

/// Hash content (first 16 hex chars of SHA-256)
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}
