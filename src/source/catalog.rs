use crate::domain::Priority;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read stream catalog: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Failed to parse stream catalog: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Duplicate stream in catalog: {0}")]
    DuplicateStream(String),
    #[error("Invalid catalog entry: {0}")]
    InvalidEntry(String),
}

/// Startup metadata for one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRecord {
    pub stream_id: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    streams: Vec<StreamRecord>,
}

/// Known streams keyed by id. Streams absent from the catalog are still
/// accepted and get medium priority.
#[derive(Debug, Clone, Default)]
pub struct StreamCatalog {
    streams: HashMap<String, StreamRecord>,
}

impl StreamCatalog {
    pub fn new(records: Vec<StreamRecord>) -> Result<Self, CatalogError> {
        let mut streams = HashMap::with_capacity(records.len());
        for record in records {
            if record.stream_id.trim().is_empty() {
                return Err(CatalogError::InvalidEntry(
                    "stream_id cannot be empty".to_string(),
                ));
            }
            if streams.contains_key(&record.stream_id) {
                return Err(CatalogError::DuplicateStream(record.stream_id));
            }
            streams.insert(record.stream_id.clone(), record);
        }
        Ok(Self { streams })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(content)?;
        Self::new(file.streams)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let catalog = Self::from_toml_str(&content)?;
        info!(
            path = %path.as_ref().display(),
            streams = catalog.len(),
            "Loaded stream catalog"
        );
        Ok(catalog)
    }

    pub fn get(&self, stream_id: &str) -> Option<&StreamRecord> {
        self.streams.get(stream_id)
    }

    pub fn priority_of(&self, stream_id: &str) -> Priority {
        self.get(stream_id)
            .map(|record| record.priority)
            .unwrap_or_default()
    }

    pub fn category_of(&self, stream_id: &str) -> Option<&str> {
        self.get(stream_id)?.category.as_deref()
    }

    pub fn unit_of(&self, stream_id: &str) -> Option<&str> {
        self.get(stream_id)?.unit.as_deref()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
