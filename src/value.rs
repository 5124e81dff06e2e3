//! Tagged configuration values.
//!
//! Topology and host inventory text is parsed once into [`Value`]; later
//! consumers pattern-match on the variant instead of probing raw YAML.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A configuration value produced by the topology and inventory parsers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Free-form text (may contain `${name}` references before rendering)
    String(String),
    /// Signed integer
    Int(i64),
    /// Boolean flag
    Bool(bool),
    /// Sequence of scalars, kept in their textual form
    List(Vec<String>),
}

impl Value {
    /// Convert a YAML scalar or scalar sequence into a value.
    ///
    /// Returns `None` for mappings, nulls and nested sequences, which have no
    /// representation as a single configuration value.
    pub fn from_yaml(value: &serde_yaml::Value) -> Option<Self> {
        match value {
            serde_yaml::Value::Sequence(items) => items
                .iter()
                .map(scalar_to_string)
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
            serde_yaml::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_yaml::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Value::Int(i)),
                None => Some(Value::String(n.to_string())),
            },
            serde_yaml::Value::String(s) => Some(Value::String(s.clone())),
            serde_yaml::Value::Tagged(tagged) => Value::from_yaml(&tagged.value),
            serde_yaml::Value::Null | serde_yaml::Value::Mapping(_) => None,
        }
    }

    /// Returns the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer payload, if this is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the boolean payload, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Bool(b) => write!(f, "{}", b),
            Value::List(items) => write!(f, "{}", items.join(",")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> serde_yaml::Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_scalars() {
        assert_eq!(Value::from_yaml(&yaml("42")), Some(Value::Int(42)));
        assert_eq!(Value::from_yaml(&yaml("true")), Some(Value::Bool(true)));
        assert_eq!(
            Value::from_yaml(&yaml("hello")),
            Some(Value::String("hello".into()))
        );
        assert_eq!(
            Value::from_yaml(&yaml("0.5")),
            Some(Value::String("0.5".into()))
        );
    }

    #[test]
    fn test_sequence_of_scalars() {
        assert_eq!(
            Value::from_yaml(&yaml("[a, 1, true]")),
            Some(Value::List(vec!["a".into(), "1".into(), "true".into()]))
        );
        assert_eq!(Value::from_yaml(&yaml("[[a]]")), None);
    }

    #[test]
    fn test_maps_and_null_rejected() {
        assert_eq!(Value::from_yaml(&yaml("{a: 1}")), None);
        assert_eq!(Value::from_yaml(&yaml("~")), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::List(vec!["a".into(), "b".into()]).to_string(), "a,b");
        assert_eq!(Value::Int(-3).to_string(), "-3");
    }
}
