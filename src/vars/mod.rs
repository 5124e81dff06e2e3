//! Variable system for storadm.
//!
//! This module provides the `${name}` substitution engine used by the topology
//! and inventory parsers:
//! - Registration of named variables (duplicates are rejected)
//! - Lazy, recursive resolution on demand
//! - Cycle and undefined-reference detection
//! - One-shot rendering of arbitrary templates
//!
//! Resolution is recursive-on-demand rather than iterative over registration
//! order, so the same set of variables always resolves to the same values.

use std::collections::HashSet;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Matches `${name}` references. Names may not contain `$`, `{` or `}`.
static REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^${}]+)\}").expect("reference pattern is valid"));

/// Errors that can occur in the variable system
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VarsError {
    #[error("variable '{0}' is already registered")]
    Duplicate(String),

    #[error("undefined variable '{name}' referenced by '{referenced_by}'")]
    Undefined { name: String, referenced_by: String },

    #[error("variable reference cycle detected: {}", chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    #[error("variable '{0}' is not resolved")]
    Unresolved(String),
}

/// Result type for variable operations
pub type VarsResult<T> = Result<T, VarsError>;

/// A named value which may itself reference other variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    /// Variable name, referenced as `${name}`
    pub name: String,
    /// Raw value before resolution, final value after
    pub value: String,
    /// Whether `value` is final
    pub resolved: bool,
}

/// Collection of variables keyed by name.
///
/// Each deploy config owns its own instance; nothing here is shared across
/// concurrently executing tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables {
    vars: IndexMap<String, Variable>,
}

impl Variables {
    /// Create an empty variable set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an unresolved variable.
    pub fn register(&mut self, name: impl Into<String>, value: impl Into<String>) -> VarsResult<()> {
        self.insert(name.into(), value.into(), false)
    }

    /// Register a variable whose value is already final and must not be
    /// scanned for references.
    pub fn register_resolved(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> VarsResult<()> {
        self.insert(name.into(), value.into(), true)
    }

    fn insert(&mut self, name: String, value: String, resolved: bool) -> VarsResult<()> {
        if self.vars.contains_key(&name) {
            return Err(VarsError::Duplicate(name));
        }
        self.vars.insert(
            name.clone(),
            Variable {
                name,
                value,
                resolved,
            },
        );
        Ok(())
    }

    /// Returns true if a variable with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Number of registered variables
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns true if no variables are registered
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterate over variables in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.values()
    }

    /// Resolve every registered variable.
    ///
    /// Fails on the first cycle or undefined reference; on failure the set
    /// may be partially resolved and should be discarded.
    pub fn build(&mut self) -> VarsResult<()> {
        let names: Vec<String> = self.vars.keys().cloned().collect();
        for name in names {
            let mut chain = Vec::new();
            let mut visiting = HashSet::new();
            self.resolve(&name, &mut visiting, &mut chain)?;
        }
        Ok(())
    }

    /// Resolve one variable, recursing into the variables it references.
    ///
    /// `visiting` holds the names on the current resolution chain; it is owned
    /// by the caller so each top-level resolution starts from an empty set.
    fn resolve(
        &mut self,
        name: &str,
        visiting: &mut HashSet<String>,
        chain: &mut Vec<String>,
    ) -> VarsResult<String> {
        let template = match self.vars.get(name) {
            Some(var) if var.resolved => return Ok(var.value.clone()),
            Some(var) => var.value.clone(),
            None => {
                return Err(VarsError::Undefined {
                    name: name.to_string(),
                    referenced_by: chain.last().cloned().unwrap_or_default(),
                })
            }
        };

        chain.push(name.to_string());
        if !visiting.insert(name.to_string()) {
            return Err(VarsError::Cycle {
                chain: chain.clone(),
            });
        }

        let mut rendered = String::with_capacity(template.len());
        let mut last = 0;
        for caps in REFERENCE.captures_iter(&template) {
            let whole = caps.get(0).expect("capture 0 is always present");
            let value = self.resolve(&caps[1], visiting, chain)?;
            rendered.push_str(&template[last..whole.start()]);
            rendered.push_str(&value);
            last = whole.end();
        }
        rendered.push_str(&template[last..]);

        visiting.remove(name);
        chain.pop();

        if let Some(var) = self.vars.get_mut(name) {
            var.value = rendered.clone();
            var.resolved = true;
        }
        Ok(rendered)
    }

    /// Get the final value of a resolved variable.
    pub fn get(&self, name: &str) -> VarsResult<&str> {
        match self.vars.get(name) {
            Some(var) if var.resolved => Ok(&var.value),
            Some(_) => Err(VarsError::Unresolved(name.to_string())),
            None => Err(VarsError::Undefined {
                name: name.to_string(),
                referenced_by: String::new(),
            }),
        }
    }

    /// Substitute every `${name}` in `template` with already-resolved values.
    pub fn rendering(&self, template: &str) -> VarsResult<String> {
        let mut failure = None;
        let rendered = REFERENCE.replace_all(template, |caps: &Captures<'_>| {
            if failure.is_some() {
                return String::new();
            }
            match self.vars.get(&caps[1]) {
                Some(var) if var.resolved => var.value.clone(),
                Some(_) => {
                    failure = Some(VarsError::Unresolved(caps[1].to_string()));
                    String::new()
                }
                None => {
                    failure = Some(VarsError::Undefined {
                        name: caps[1].to_string(),
                        referenced_by: template.to_string(),
                    });
                    String::new()
                }
            }
        });

        match failure {
            Some(err) => Err(err),
            None => Ok(rendered.into_owned()),
        }
    }
}

/// Returns true if `text` contains at least one `${name}` reference.
pub fn has_reference(text: &str) -> bool {
    REFERENCE.is_match(text)
}
