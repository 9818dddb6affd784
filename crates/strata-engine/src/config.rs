//! Pipeline configuration
//!
//! A YAML document read purely through key paths. Blocks name the paths
//! they depend on; nothing else in the engine interprets the document.

use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::ConfigError;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    root: Value,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new(Value::Mapping(Mapping::new()))
    }
}

impl PipelineConfig {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let root: Value = serde_yaml::from_str(text)?;
        Ok(match root {
            Value::Null => Self::default(),
            root => Self::new(root),
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Value at a key path
    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        path.iter()
            .try_fold(&self.root, |current, segment| current.get(segment.as_ref()))
    }

    /// Value at a dotted key path, e.g. `post_processing.z-scoring.run`
    pub fn get_dotted(&self, dotted: &str) -> Option<&Value> {
        let segments: Vec<&str> = dotted.split('.').collect();
        self.get(&segments)
    }

    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> Result<&Value, ConfigError> {
        self.get(path).ok_or_else(|| ConfigError::missing(path))
    }

    /// True if the value is `true` or a list containing `true`; absent is false
    pub fn flag<S: AsRef<str>>(&self, path: &[S]) -> bool {
        match self.get(path) {
            Some(Value::Bool(on)) => *on,
            Some(Value::Sequence(items)) => items.iter().any(|v| v.as_bool() == Some(true)),
            _ => false,
        }
    }

    /// A string, or every string of a list; anything else is empty
    pub fn strings_at<S: AsRef<str>>(&self, path: &[S]) -> Vec<String> {
        match self.get(path) {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Sequence(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn contains_str<S: AsRef<str>>(&self, path: &[S], item: &str) -> bool {
        self.strings_at(path).iter().any(|s| s == item)
    }

    /// True if the last segment of `path` is a key (or list item) of the
    /// value at the parent path
    pub fn has_member<S: AsRef<str>>(&self, path: &[S]) -> bool {
        let Some((last, parent)) = path.split_last() else {
            return false;
        };
        let last = last.as_ref();
        match self.get(parent) {
            Some(Value::Mapping(map)) => map.contains_key(last),
            Some(Value::Sequence(items)) => items.iter().any(|v| v.as_str() == Some(last)),
            Some(Value::String(s)) => s == last,
            _ => false,
        }
    }

    /// Set a value, creating intermediate mappings
    pub fn set<S: AsRef<str>>(&mut self, path: &[S], value: Value) {
        let Some((last, parents)) = path.split_last() else {
            self.root = value;
            return;
        };
        let mut current = &mut self.root;
        for segment in parents {
            if !current.is_mapping() {
                *current = Value::Mapping(Mapping::new());
            }
            let Value::Mapping(map) = current else {
                return;
            };
            current = map
                .entry(Value::String(segment.as_ref().to_string()))
                .or_insert_with(|| Value::Mapping(Mapping::new()));
        }
        if !current.is_mapping() {
            *current = Value::Mapping(Mapping::new());
        }
        if let Value::Mapping(map) = current {
            map.insert(Value::String(last.as_ref().to_string()), value);
        }
    }

    /// Merge another config into this one; values from `other` win
    pub fn merge(&mut self, other: &PipelineConfig) {
        let base = std::mem::take(&mut self.root);
        self.root = merge_values(base, other.root.clone());
    }
}

/// Merge two YAML values recursively
fn merge_values(base: Value, override_val: Value) -> Value {
    match (base, override_val) {
        (Value::Mapping(mut base_map), Value::Mapping(override_map)) => {
            for (key, value) in override_map {
                let entry = base_map.entry(key).or_insert(Value::Null);
                *entry = merge_values(entry.clone(), value);
            }
            Value::Mapping(base_map)
        }
        (_, override_val) => override_val,
    }
}

pub(crate) fn display_path<S: AsRef<str>>(path: &[S]) -> String {
    path.iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(".")
}
