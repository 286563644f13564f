//! Plugin records and metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted plugin: name, description and script source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRecord {
    /// Unique, trimmed, non-empty name
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Script text
    pub source: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl PluginRecord {
    pub fn new(name: impl Into<String>, description: impl Into<String>, source: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: description.into(),
            source: source.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            source_hash: Some(crate::store::hash_content(&self.source)),
            updated_at: Some(self.updated_at),
        }
    }
}

/// Plugin metadata returned by list operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,

    pub description: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Normalize a plugin name, rejecting names that are empty once trimmed
pub fn normalize_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
