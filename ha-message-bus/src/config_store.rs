use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Separator between the segments of a configuration key, e.g. `kafka_config.endpoints`.
pub const KEY_DELIMITER: char = '.';

#[derive(Error, Debug)]
pub enum ConfigStoreError {
    #[error("config index {0} is not loaded")]
    IndexNotFound(String),
    #[error("key {key} not found in config index {index}")]
    KeyNotFound { index: String, key: String },
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Read access to cluster configuration, organised in named indexes that each
/// hold a document addressed by dotted keys.
pub trait ConfigStore: Send + Sync {
    fn get(&self, index: &str, key: &str) -> Result<Value, ConfigStoreError>;
}

/// Config store backed by JSON documents, one per index.
#[derive(Debug, Default, Clone)]
pub struct JsonConfigStore {
    indexes: HashMap<String, Value>,
}

impl JsonConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads (or replaces) an index from an in-memory document.
    pub fn load(&mut self, index: &str, document: Value) -> &mut Self {
        self.indexes.insert(index.to_string(), document);
        self
    }

    pub fn load_file(&mut self, index: &str, path: &Path) -> Result<&mut Self, ConfigStoreError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigStoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let document = serde_json::from_str(&contents).map_err(|source| ConfigStoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        debug!("loaded config index {} from {}", index, path.display());
        Ok(self.load(index, document))
    }
}

impl ConfigStore for JsonConfigStore {
    fn get(&self, index: &str, key: &str) -> Result<Value, ConfigStoreError> {
        let document = self
            .indexes
            .get(index)
            .ok_or_else(|| ConfigStoreError::IndexNotFound(index.to_string()))?;

        lookup(document, key)
            .cloned()
            .ok_or_else(|| ConfigStoreError::KeyNotFound {
                index: index.to_string(),
                key: key.to_string(),
            })
    }
}

// Objects are walked by field name, arrays by numeric position.
fn lookup<'a>(document: &'a Value, key: &str) -> Option<&'a Value> {
    key.split(KEY_DELIMITER)
        .try_fold(document, |value, segment| match value {
            Value::Object(fields) => fields.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}
