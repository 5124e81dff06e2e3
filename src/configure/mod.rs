//! Typed configuration item schema.
//!
//! An [`ItemSet`] declares, per key, the type a value must coerce to, whether
//! the key is an administrative setting excluded from the derived service
//! configuration, and an optional default. The schema is open: keys that are
//! not declared pass through without validation.

pub mod catalog;
pub mod layer;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::value::Value;

/// Errors produced when coercing a value to its declared type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemError {
    #[error("'{key}' requires a string, got {actual}")]
    RequiresString { key: String, actual: String },

    #[error("'{key}' requires an integer, got '{actual}'")]
    RequiresInt { key: String, actual: String },

    #[error("'{key}' requires a boolean, got '{actual}'")]
    RequiresBool { key: String, actual: String },

    #[error("'{key}' requires a positive integer, got '{actual}'")]
    RequiresPositiveInt { key: String, actual: String },
}

/// Type a configuration value must coerce to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredType {
    Any,
    String,
    Bool,
    Int,
    PositiveInt,
}

/// Facts about the owner of a configuration, used by computed defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultContext<'a> {
    /// Storage-system variant, e.g. `curvebs`
    pub kind: &'a str,
    /// Service role, e.g. `mds`; empty for host inventory entries
    pub role: &'a str,
}

type DefaultFn = dyn Fn(&DefaultContext<'_>) -> Option<Value> + Send + Sync;

/// Default value for a config item.
#[derive(Clone)]
pub enum DefaultValue {
    /// No default; the key stays absent unless configured
    None,
    /// A fixed value
    Static(Value),
    /// Computed from the owning configuration
    Computed(Arc<DefaultFn>),
}

impl DefaultValue {
    /// Build a computed default from a closure.
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&DefaultContext<'_>) -> Option<Value> + Send + Sync + 'static,
    {
        DefaultValue::Computed(Arc::new(f))
    }

    /// Evaluate the default for a given owner.
    pub fn evaluate(&self, ctx: &DefaultContext<'_>) -> Option<Value> {
        match self {
            DefaultValue::None => None,
            DefaultValue::Static(v) => Some(v.clone()),
            DefaultValue::Computed(f) => f(ctx),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::None => write!(f, "None"),
            DefaultValue::Static(v) => write!(f, "Static({:?})", v),
            DefaultValue::Computed(_) => write!(f, "Computed(..)"),
        }
    }
}

/// A declared configuration key
#[derive(Debug, Clone)]
pub struct Item {
    pub key: String,
    pub required_type: RequiredType,
    /// Excluded from the derived service configuration
    pub exclude: bool,
    pub default: DefaultValue,
}

impl Item {
    /// Coerce `value` to this item's declared type.
    pub fn coerce(&self, value: Value) -> Result<Value, ItemError> {
        let key = || self.key.clone();
        match self.required_type {
            RequiredType::Any => Ok(value),
            RequiredType::String => match value {
                Value::List(items) => Err(ItemError::RequiresString {
                    key: key(),
                    actual: format!("list [{}]", items.join(",")),
                }),
                other => Ok(Value::String(other.to_string())),
            },
            RequiredType::Int => parse_int(&value).map(Value::Int).ok_or_else(|| {
                ItemError::RequiresInt {
                    key: key(),
                    actual: value.to_string(),
                }
            }),
            RequiredType::PositiveInt => match parse_int(&value) {
                Some(n) if n > 0 => Ok(Value::Int(n)),
                _ => Err(ItemError::RequiresPositiveInt {
                    key: key(),
                    actual: value.to_string(),
                }),
            },
            RequiredType::Bool => match &value {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::String(s) => s.trim().parse::<bool>().map(Value::Bool).map_err(|_| {
                    ItemError::RequiresBool {
                        key: key(),
                        actual: s.clone(),
                    }
                }),
                other => Err(ItemError::RequiresBool {
                    key: key(),
                    actual: other.to_string(),
                }),
            },
        }
    }
}

fn parse_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(n) => Some(*n),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Ordered set of declared configuration items.
#[derive(Debug, Clone, Default)]
pub struct ItemSet {
    items: IndexMap<String, Item>,
}

impl ItemSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an item. Re-inserting a key replaces the earlier declaration
    /// but keeps its position.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        required_type: RequiredType,
        exclude: bool,
        default: DefaultValue,
    ) -> &Item {
        let key = key.into();
        let item = Item {
            key: key.clone(),
            required_type,
            exclude,
            default,
        };
        let (index, _) = self.items.insert_full(key, item);
        &self.items[index]
    }

    /// Look up a declared item.
    pub fn get(&self, key: &str) -> Option<&Item> {
        self.items.get(key)
    }

    /// All declared items in insertion order.
    pub fn get_all(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    /// Coerce a raw value for `key`. Undeclared keys pass through unchanged.
    pub fn build(&self, key: &str, value: Value) -> Result<Value, ItemError> {
        match self.items.get(key) {
            Some(item) => item.coerce(value),
            None => Ok(value),
        }
    }

    /// Returns true if `key` belongs to the service configuration view.
    pub fn in_service_config(&self, key: &str) -> bool {
        self.items.get(key).map_or(true, |item| !item.exclude)
    }
}
