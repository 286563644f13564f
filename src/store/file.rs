//! File-based store.
//!
//! Layout under the store root:
//! - `plugins/<hash>.json`: one plugin record per file, keyed by a hash of
//!   the name so arbitrary names stay inside the directory
//! - `jobs/<uuid>.json`: one job per file
//! - `tasks/<uuid>.yaml`: submitted task definitions
//!
//! Writes go to a temp file and are renamed into place. Read-modify-write
//! cycles hold an exclusive lock on `.lock`.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{hash_content, JobStore, PluginStore, StoreError};
use crate::core::TaskDefinition;
use crate::domain::{Job, JobStatus, PluginRecord, RunStatus, StepResults};

/// Directory-backed plugin and job store
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    plugins_dir: PathBuf,
    jobs_dir: PathBuf,
    tasks_dir: PathBuf,
    lock_path: PathBuf,
}

impl FileStore {
    /// Create or open a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let store = Self {
            plugins_dir: root.join("plugins"),
            jobs_dir: root.join("jobs"),
            tasks_dir: root.join("tasks"),
            lock_path: root.join(".lock"),
            root,
        };

        for dir in [&store.plugins_dir, &store.jobs_dir, &store.tasks_dir] {
            fs::create_dir_all(dir).await?;
        }

        debug!(root = %store.root.display(), "Opened file store");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn plugin_path(&self, name: &str) -> PathBuf {
        self.plugins_dir.join(format!("{}.json", hash_content(name.trim())))
    }

    fn job_path(&self, id: Uuid) -> PathBuf {
        self.jobs_dir.join(format!("{}.json", id))
    }

    /// Run a blocking read-modify-write under the store lock
    async fn locked<F, T>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let lock_path = self.lock_path.clone();
        tokio::task::spawn_blocking(move || {
            let lock = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)?;
            lock.lock_exclusive()
                .map_err(|err| StoreError::Lock(err.to_string()))?;

            // Lock is released when `lock` is dropped
            op()
        })
        .await
        .map_err(|err| StoreError::Lock(err.to_string()))?
    }

    async fn list_json<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, StoreError> {
        let mut items = Vec::new();
        let mut entries = fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let content = fs::read_to_string(&path).await?;
            match serde_json::from_str(&content) {
                Ok(item) => items.push(item),
                Err(err) => warn!(path = %path.display(), error = %err, "Skipping unreadable record"),
            }
        }

        Ok(items)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl PluginStore for FileStore {
    async fn load_plugin_source(&self, name: &str) -> Result<String, StoreError> {
        match fs::read_to_string(self.plugin_path(name)).await {
            Ok(content) => Ok(serde_json::from_str::<PluginRecord>(&content)?.source),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::plugin_not_found(name))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn save_or_replace_plugin(&self, record: &PluginRecord) -> Result<(), StoreError> {
        let path = self.plugin_path(&record.name);
        let mut record = record.clone();

        self.locked(move || {
            if let Some(existing) = read_json::<PluginRecord>(&path)? {
                record.created_at = existing.created_at;
            }
            record.updated_at = Utc::now();
            write_json(&path, &record)
        })
        .await
    }

    async fn delete_plugin(&self, name: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.plugin_path(name)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::plugin_not_found(name))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn list_plugins(&self) -> Result<Vec<PluginRecord>, StoreError> {
        Self::list_json(&self.plugins_dir).await
    }
}

#[async_trait]
impl JobStore for FileStore {
    async fn load_job_input(&self, id: Uuid) -> Result<Value, StoreError> {
        Ok(self.get_job(id).await?.input_data)
    }

    async fn get_job(&self, id: Uuid) -> Result<Job, StoreError> {
        match fs::read_to_string(self.job_path(id)).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::job_not_found(id))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = Self::list_json(&self.jobs_dir).await?;
        // Most recent first
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn save_job(&self, job: &Job) -> Result<Uuid, StoreError> {
        let path = self.job_path(job.id);
        let job = job.clone();
        let id = job.id;
        self.locked(move || write_json(&path, &job)).await?;
        Ok(id)
    }

    async fn update_job_results(
        &self,
        id: Uuid,
        results: &StepResults,
        status: RunStatus,
    ) -> Result<(), StoreError> {
        let path = self.job_path(id);
        let results = results.clone();

        self.locked(move || {
            let mut job: Job = read_json(&path)?.ok_or_else(|| StoreError::job_not_found(id))?;
            job.apply_results(results, status);
            if job.status == JobStatus::Failed {
                job.error.get_or_insert_with(|| "run failed".to_string());
            }
            write_json(&path, &job)
        })
        .await
    }

    async fn save_task(&self, task: &TaskDefinition) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let path = self.tasks_dir.join(format!("{}.yaml", id));
        fs::write(&path, serde_yaml::to_string(task)?).await?;
        Ok(id)
    }
}
