//! Driver configuration shared by every backend.
//!
//! A [`DriverConfig`] names the collection a driver is bound to and carries
//! free-form, driver-specific options. The collection name may be given under
//! any of `collectionName`, `tableName`, `collection` or `table`; the first
//! non-empty one wins and [`DEFAULT_COLLECTION`] is used when none is set.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RecordStoreError, RecordStoreResult};

/// Collection used when a configuration does not name one.
pub const DEFAULT_COLLECTION: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DriverConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Driver-specific options such as hosts, credentials or file paths.
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl DriverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a configuration from a JSON object.
    pub fn from_json(value: Value) -> RecordStoreResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| RecordStoreError::Configuration(format!("invalid driver config: {e}")))
    }

    /// Binds the configuration to a collection.
    pub fn with_collection(mut self, name: impl Into<String>) -> Self {
        self.collection_name = Some(name.into());
        self
    }

    /// Sets a driver-specific option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    /// Resolves the collection this configuration targets.
    pub fn collection_name(&self) -> &str {
        [&self.collection_name, &self.table_name, &self.collection, &self.table]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|name| !name.is_empty())
            .unwrap_or(DEFAULT_COLLECTION)
    }

    /// Canonical text form of the driver options.
    ///
    /// Object keys are sorted at every depth, so two configurations with the
    /// same options produce the same signature regardless of how they were
    /// built. The collection name is not part of the signature.
    pub fn connection_signature(&self) -> String {
        canonicalize(&Value::Object(self.options.clone())).to_string()
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries = map.iter().collect::<Vec<_>>();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));

            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), canonicalize(value)))
                    .collect::<Map<_, _>>(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
