use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::error::DataLoadError;
use crate::value::Value;

/// The read-only variable namespace shared by every page of a build.
///
/// Cloning is cheap; all clones share the same mapping.
#[derive(Debug, Clone, Default)]
pub struct DataContext {
    values: Arc<BTreeMap<String, Value>>,
}

impl DataContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from a JSON value, which must be an object.
    pub fn from_json(json: serde_json::Value) -> Option<Self> {
        match Value::from(json) {
            Value::Map(values) => Some(Self {
                values: Arc::new(values),
            }),
            _ => None,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Add `globals` underneath this context: keys already present win.
    pub fn with_globals<I>(self, globals: I) -> Self
    where
        I: IntoIterator<Item = (String, serde_json::Value)>,
    {
        let mut values = Arc::unwrap_or_clone(self.values);
        for (key, value) in globals {
            values.entry(key).or_insert_with(|| Value::from(value));
        }
        Self {
            values: Arc::new(values),
        }
    }
}

impl Serialize for DataContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.values.as_ref().serialize(serializer)
    }
}

/// Loads the structured data document for a build.
pub struct DataProvider;

impl DataProvider {
    /// Parse a `.json` or `.toml` document whose top level is a mapping.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<DataContext, DataLoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DataLoadError::Io(path.to_path_buf(), e))?;

        let json: serde_json::Value = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&text)
                .map_err(|e| DataLoadError::Json(path.to_path_buf(), e))?,
            Some("toml") => toml::from_str(&text)
                .map_err(|e| DataLoadError::Toml(path.to_path_buf(), e))?,
            _ => return Err(DataLoadError::UnsupportedFormat(path.to_path_buf())),
        };

        let context = DataContext::from_json(json)
            .ok_or_else(|| DataLoadError::NotAMapping(path.to_path_buf()))?;
        tracing::debug!(path = %path.display(), keys = context.len(), "loaded data document");

        Ok(context)
    }
}
