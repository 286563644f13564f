//! Plugin registry: compiled script cache.
//!
//! Compilation happens outside the lock; the write lock is only held for the
//! swap, so a slow compile never blocks lookups. A failed (re-)registration
//! leaves whatever was installed before untouched and runnable.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use rhai::{Engine, AST};
use tracing::{debug, info};

use super::sandbox::{build_engine, SandboxLimits};
use crate::domain::{normalize_name, PluginInfo};
use crate::error::EngineError;
use crate::store::hash_content;

/// A compiled, installable plugin
#[derive(Debug, Clone)]
pub struct CompiledPlugin {
    pub name: String,

    pub description: String,

    /// Short SHA-256 of the source this artifact was compiled from
    pub source_hash: String,

    pub ast: AST,

    pub compiled_at: DateTime<Utc>,
}

impl CompiledPlugin {
    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            source_hash: Some(self.source_hash.clone()),
            updated_at: Some(self.compiled_at),
        }
    }
}

/// Source that compiled successfully but is not installed yet
#[derive(Debug, Clone)]
pub struct CompiledSource {
    pub ast: AST,
    pub source_hash: String,
}

/// Thread-safe name -> compiled plugin cache
pub struct PluginRegistry {
    /// Engine used only for parsing; it never evaluates anything
    compiler: Engine,

    plugins: RwLock<HashMap<String, Arc<CompiledPlugin>>>,
}

impl PluginRegistry {
    pub fn new(limits: SandboxLimits) -> Self {
        Self {
            compiler: build_engine(&limits),
            plugins: RwLock::new(HashMap::new()),
        }
    }

    /// Parse and compile a script without touching the cache
    pub fn compile(&self, name: &str, source: &str) -> Result<CompiledSource, EngineError> {
        let ast = self
            .compiler
            .compile(source)
            .map_err(|err| EngineError::Compile {
                name: name.to_string(),
                message: err.to_string(),
            })?;

        Ok(CompiledSource {
            ast,
            source_hash: hash_content(source),
        })
    }

    /// Install an already compiled source under `name`, replacing any prior artifact
    pub fn install(
        &self,
        name: &str,
        description: &str,
        compiled: CompiledSource,
    ) -> Result<Arc<CompiledPlugin>, EngineError> {
        let name = normalize_name(name).ok_or_else(|| EngineError::InvalidPluginName(name.to_string()))?;

        let plugin = Arc::new(CompiledPlugin {
            name: name.clone(),
            description: description.to_string(),
            source_hash: compiled.source_hash,
            ast: compiled.ast,
            compiled_at: Utc::now(),
        });

        let previous = self
            .plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), Arc::clone(&plugin));

        match previous {
            Some(old) => info!(
                plugin = %name,
                old_hash = %old.source_hash,
                new_hash = %plugin.source_hash,
                "Plugin replaced"
            ),
            None => info!(plugin = %name, hash = %plugin.source_hash, "Plugin registered"),
        }

        Ok(plugin)
    }

    /// Compile and install in one go
    pub fn register(
        &self,
        name: &str,
        description: &str,
        source: &str,
    ) -> Result<Arc<CompiledPlugin>, EngineError> {
        let normalized =
            normalize_name(name).ok_or_else(|| EngineError::InvalidPluginName(name.to_string()))?;
        let compiled = self.compile(&normalized, source)?;
        self.install(&normalized, description, compiled)
    }

    /// Look up the live artifact for `name`
    pub fn lookup(&self, name: &str) -> Result<Arc<CompiledPlugin>, EngineError> {
        let key = name.trim();
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::PluginNotFound {
                name: key.to_string(),
            })
    }

    pub fn remove(&self, name: &str) -> Result<(), EngineError> {
        let key = name.trim();
        let removed = self
            .plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);

        match removed {
            Some(_) => {
                debug!(plugin = %key, "Plugin removed from registry");
                Ok(())
            }
            None => Err(EngineError::PluginNotFound {
                name: key.to_string(),
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name.trim())
    }

    /// Metadata of every installed plugin, sorted by name
    pub fn list(&self) -> Vec<PluginInfo> {
        let mut infos: Vec<PluginInfo> = self
            .plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|plugin| plugin.info())
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn len(&self) -> usize {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new(SandboxLimits::default())
    }
}
