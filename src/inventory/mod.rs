//! Host inventory for storadm.
//!
//! Hosts are declared separately from the topology and name the machines
//! instances are deployed to:
//!
//! ```yaml
//! global:
//!   user: curve
//!   ssh_port: 22
//! hosts:
//!   - host: server-1
//!     hostname: 10.0.0.1
//!   - host: server-2
//!     hostname: 10.0.0.2
//!     forward_agent: true
//! ```
//!
//! `global` keys are defaults for every host. Values are coerced through
//! [`HOST_ITEMS`], and may reference `${name}` from a `variable:` block.

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::configure::catalog::{
    HOST_ITEMS, KEY_BECOME_USER, KEY_ENVS, KEY_FORWARD_AGENT, KEY_HOST, KEY_HOSTNAME, KEY_LABELS,
    KEY_PRIVATE_KEY_FILE, KEY_SSH_PORT, KEY_USER,
};
use crate::configure::layer::{ConfigLayer, LayerError};
use crate::configure::{DefaultContext, ItemError};
use crate::value::Value;
use crate::vars::{Variables, VarsError};

/// Errors that can occur while parsing the host inventory
#[derive(Debug, Error)]
pub enum HostsError {
    #[error("malformed hosts: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("hosts[{index}]: missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("{location}: {source}")]
    Layer {
        location: String,
        #[source]
        source: LayerError,
    },

    #[error("host '{host}': {source}")]
    Coerce {
        host: String,
        #[source]
        source: ItemError,
    },

    #[error("hosts[{index}]: {source}")]
    Variable {
        index: usize,
        #[source]
        source: VarsError,
    },

    #[error("'{field}' must be a positive integer below 65536, got {value}")]
    InvalidPort { field: &'static str, value: i64 },

    #[error("duplicate host '{0}'")]
    DuplicateHost(String),

    #[error("host '{0}' not found")]
    NotFound(String),
}

/// Result type for host inventory operations
pub type HostsResult<T> = Result<T, HostsError>;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct HostsDoc {
    #[serde(default)]
    global: serde_yaml::Mapping,
    #[serde(default)]
    hosts: Vec<serde_yaml::Mapping>,
}

/// One machine the cluster is deployed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Name topologies refer to
    pub host: String,
    /// Address ssh connects to
    pub hostname: String,
    pub ssh_port: u16,
    pub user: String,
    /// Key path, with `~` expanded
    pub private_key_file: String,
    pub forward_agent: bool,
    pub become_user: Option<String>,
    pub labels: Vec<String>,
    /// `NAME=value` pairs exported before remote commands
    pub envs: Vec<String>,
}

impl HostConfig {
    /// A host reached at `hostname` with every other field defaulted.
    pub fn new(host: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            hostname: hostname.into(),
            ssh_port: 22,
            user: std::env::var("USER").unwrap_or_else(|_| "root".to_string()),
            private_key_file: expand_path("~/.ssh/id_rsa"),
            forward_agent: false,
            become_user: None,
            labels: Vec::new(),
            envs: Vec::new(),
        }
    }

    fn from_layer(index: usize, layer: ConfigLayer) -> HostsResult<Self> {
        let mut variables = Variables::new();
        for (name, value) in &layer.variables {
            variables
                .register(name.clone(), value.clone())
                .map_err(|source| HostsError::Variable { index, source })?;
        }
        variables
            .build()
            .map_err(|source| HostsError::Variable { index, source })?;

        let defaults = DefaultContext { kind: "", role: "" };
        let mut values = IndexMap::new();
        for item in HOST_ITEMS.get_all() {
            let raw = match layer.values.get(&item.key) {
                Some(v) => Some(v.clone()),
                None => item.default.evaluate(&defaults),
            };
            if let Some(raw) = raw {
                let rendered = render(&variables, raw)
                    .map_err(|source| HostsError::Variable { index, source })?;
                values.insert(item.key.clone(), rendered);
            }
        }

        let text = |key: &str| values.get(key).map(Value::to_string).filter(|s| !s.is_empty());
        let host = text(KEY_HOST).ok_or(HostsError::MissingField {
            index,
            field: KEY_HOST,
        })?;
        let hostname = text(KEY_HOSTNAME).ok_or(HostsError::MissingField {
            index,
            field: KEY_HOSTNAME,
        })?;

        let mut typed = IndexMap::new();
        for (key, value) in values {
            let value = HOST_ITEMS
                .build(&key, value)
                .map_err(|source| HostsError::Coerce {
                    host: host.clone(),
                    source,
                })?;
            typed.insert(key, value);
        }

        let port = typed.get(KEY_SSH_PORT).and_then(Value::as_int).unwrap_or(22);
        let ssh_port = u16::try_from(port).map_err(|_| HostsError::InvalidPort {
            field: KEY_SSH_PORT,
            value: port,
        })?;
        let string = |key: &str| typed.get(key).map(Value::to_string).unwrap_or_default();
        let list = |key: &str| match typed.get(key) {
            Some(Value::List(items)) => items.clone(),
            Some(other) => vec![other.to_string()],
            None => Vec::new(),
        };

        Ok(Self {
            host,
            hostname,
            ssh_port,
            user: string(KEY_USER),
            private_key_file: expand_path(&string(KEY_PRIVATE_KEY_FILE)),
            forward_agent: typed
                .get(KEY_FORWARD_AGENT)
                .and_then(Value::as_bool)
                .unwrap_or(false),
            become_user: typed.get(KEY_BECOME_USER).map(Value::to_string),
            labels: list(KEY_LABELS),
            envs: list(KEY_ENVS),
        })
    }
}

fn render(variables: &Variables, value: Value) -> Result<Value, VarsError> {
    Ok(match value {
        Value::String(s) => Value::String(variables.rendering(&s)?),
        Value::List(items) => Value::List(
            items
                .iter()
                .map(|item| variables.rendering(item))
                .collect::<Result<_, _>>()?,
        ),
        other => other,
    })
}

fn expand_path(path: &str) -> String {
    shellexpand::tilde(path).into_owned()
}

/// Parsed host inventory, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hosts {
    hosts: IndexMap<String, HostConfig>,
}

impl Hosts {
    /// Parse hosts text. Blank text is an empty inventory.
    #[instrument(skip(text), fields(len = text.len()))]
    pub fn parse(text: &str) -> HostsResult<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let doc: HostsDoc = serde_yaml::from_str(text)?;
        let global =
            ConfigLayer::from_mapping(&doc.global).map_err(|source| HostsError::Layer {
                location: "global".to_string(),
                source,
            })?;

        let mut hosts = IndexMap::new();
        for (index, mapping) in doc.hosts.iter().enumerate() {
            let layer = ConfigLayer::from_mapping(mapping)
                .map_err(|source| HostsError::Layer {
                    location: format!("hosts[{}]", index),
                    source,
                })?
                .inherited(&global);
            let host = HostConfig::from_layer(index, layer)?;
            if hosts.contains_key(&host.host) {
                return Err(HostsError::DuplicateHost(host.host));
            }
            hosts.insert(host.host.clone(), host);
        }

        debug!(hosts = hosts.len(), "Parsed host inventory");
        Ok(Self { hosts })
    }

    /// Build an inventory from already constructed hosts.
    pub fn from_hosts(hosts: impl IntoIterator<Item = HostConfig>) -> HostsResult<Self> {
        let mut inventory = Self::default();
        for host in hosts {
            if inventory.hosts.contains_key(&host.host) {
                return Err(HostsError::DuplicateHost(host.host));
            }
            inventory.hosts.insert(host.host.clone(), host);
        }
        Ok(inventory)
    }

    /// Look up a host by name.
    pub fn get(&self, host: &str) -> HostsResult<&HostConfig> {
        self.hosts
            .get(host)
            .ok_or_else(|| HostsError::NotFound(host.to_string()))
    }

    pub fn contains(&self, host: &str) -> bool {
        self.hosts.contains_key(host)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostConfig> {
        self.hosts.values()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const HOSTS: &str = r#"
global:
  user: curve
  ssh_port: 2222
  private_key_file: /keys/id_ed25519
  variable:
    subnet: 10.0.1
hosts:
  - host: server-1
    hostname: ${subnet}.1
    labels:
      - storage
  - host: server-2
    hostname: 10.0.1.2
    ssh_port: 22
    forward_agent: true
    envs:
      - LANG=C
"#;

    #[test]
    fn test_parse_hosts() {
        let hosts = Hosts::parse(HOSTS).unwrap();
        assert_eq!(hosts.len(), 2);

        let first = hosts.get("server-1").unwrap();
        assert_eq!(first.hostname, "10.0.1.1");
        assert_eq!(first.user, "curve");
        assert_eq!(first.ssh_port, 2222);
        assert_eq!(first.private_key_file, "/keys/id_ed25519");
        assert_eq!(first.labels, vec!["storage".to_string()]);
        assert!(!first.forward_agent);

        let second = hosts.get("server-2").unwrap();
        assert_eq!(second.ssh_port, 22);
        assert!(second.forward_agent);
        assert_eq!(second.envs, vec!["LANG=C".to_string()]);
    }

    #[test]
    fn test_missing_hostname() {
        let text = "hosts:\n  - host: a\n";
        assert!(matches!(
            Hosts::parse(text),
            Err(HostsError::MissingField {
                index: 0,
                field: "hostname"
            })
        ));
    }

    #[test]
    fn test_duplicate_host() {
        let text = "hosts:\n  - host: a\n    hostname: 1.1.1.1\n  - host: a\n    hostname: 1.1.1.2\n";
        assert!(matches!(
            Hosts::parse(text),
            Err(HostsError::DuplicateHost(h)) if h == "a"
        ));
    }

    #[test]
    fn test_bad_port() {
        let text = "hosts:\n  - host: a\n    hostname: h\n    ssh_port: zero\n";
        assert!(matches!(
            Hosts::parse(text),
            Err(HostsError::Coerce {
                source: ItemError::RequiresPositiveInt { .. },
                ..
            })
        ));

        let text = "hosts:\n  - host: a\n    hostname: h\n    ssh_port: 70000\n";
        assert!(matches!(
            Hosts::parse(text),
            Err(HostsError::InvalidPort { value: 70000, .. })
        ));
    }

    #[test]
    fn test_tilde_expanded() {
        let text = "hosts:\n  - host: a\n    hostname: h\n    private_key_file: ~/.ssh/key\n";
        let hosts = Hosts::parse(text).unwrap();
        assert!(!hosts.get("a").unwrap().private_key_file.starts_with('~'));
    }

    #[test]
    fn test_lookup_missing() {
        let hosts = Hosts::parse("").unwrap();
        assert!(hosts.is_empty());
        assert!(matches!(hosts.get("x"), Err(HostsError::NotFound(_))));
    }
}
