//! One level of a hierarchical configuration (global, service or host).

use indexmap::IndexMap;
use thiserror::Error;

use super::catalog::KEY_VARIABLE;
use crate::value::Value;

/// Errors converting YAML mappings into configuration layers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayerError {
    #[error("configuration keys must be strings, got {0}")]
    NonStringKey(String),

    #[error("'{key}' has no value")]
    NullValue { key: String },

    #[error("'{key}' must be a scalar or a list of scalars")]
    NotScalar { key: String },

    #[error("'variable' must be a mapping of names to scalars")]
    InvalidVariableBlock,
}

/// Configuration values plus the `variable:` definitions declared alongside.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLayer {
    pub values: IndexMap<String, Value>,
    pub variables: IndexMap<String, String>,
}

impl ConfigLayer {
    /// Convert a YAML mapping. A nested `variable:` mapping is split out into
    /// [`ConfigLayer::variables`]; any other nested mapping is rejected.
    pub fn from_mapping(mapping: &serde_yaml::Mapping) -> Result<Self, LayerError> {
        let mut layer = ConfigLayer::default();
        for (key, value) in mapping {
            let key = yaml_key(key)?;
            if key == KEY_VARIABLE {
                layer.variables = variable_block(value)?;
                continue;
            }
            if value.is_null() {
                return Err(LayerError::NullValue { key });
            }
            match Value::from_yaml(value) {
                Some(v) => {
                    layer.values.insert(key, v);
                }
                None => return Err(LayerError::NotScalar { key }),
            }
        }
        Ok(layer)
    }

    /// Fill keys this layer has not set from `parent`. The child always
    /// wins; `variable:` definitions are merged name by name.
    pub fn inherit(&mut self, parent: &ConfigLayer) {
        for (key, value) in &parent.values {
            self.values
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        for (name, value) in &parent.variables {
            self.variables
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Returns a copy of `self` with `parent` inherited.
    pub fn inherited(mut self, parent: &ConfigLayer) -> Self {
        self.inherit(parent);
        self
    }
}

fn yaml_key(key: &serde_yaml::Value) -> Result<String, LayerError> {
    match key {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        other => Err(LayerError::NonStringKey(
            serde_yaml::to_string(other)
                .map(|s| s.trim().to_string())
                .unwrap_or_default(),
        )),
    }
}

fn variable_block(value: &serde_yaml::Value) -> Result<IndexMap<String, String>, LayerError> {
    let mapping = match value {
        serde_yaml::Value::Mapping(m) => m,
        serde_yaml::Value::Null => return Ok(IndexMap::new()),
        _ => return Err(LayerError::InvalidVariableBlock),
    };

    let mut variables = IndexMap::new();
    for (name, value) in mapping {
        let name = yaml_key(name)?;
        match Value::from_yaml(value) {
            Some(Value::List(_)) | None => return Err(LayerError::InvalidVariableBlock),
            Some(v) => {
                variables.insert(name, v.to_string());
            }
        }
    }
    Ok(variables)
}
