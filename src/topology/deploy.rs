//! Deploy configs: one concrete service instance of a topology.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::configure::catalog::{
    DEPLOY_ITEMS, KEY_CONTAINER_IMAGE, KEY_CORE_DIR, KEY_DATA_DIR, KEY_LISTEN_PORT, KEY_LOG_DIR,
};
use crate::configure::layer::ConfigLayer;
use crate::configure::DefaultContext;
use crate::value::Value;
use crate::vars::Variables;

use super::variables::{register_service_variables, Endpoint, ServiceFacts};
use super::{Kind, TopologyError, TopologyResult};

/// Format an instance id from its four identifying fields.
pub fn format_id(role: &str, host: &str, name: &str, replica_sequence: usize) -> String {
    format!("{}_{}_{}_{}", role, host, name, replica_sequence)
}

/// One cluster-service instance.
///
/// Built by the topology parser and immutable afterwards. Two instances are
/// equal when they are built from the same definition and see the same
/// values for the cluster variables they reference; per-build values such
/// as `${random_uuid}` take no part.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    kind: Kind,
    id: String,
    parent_id: String,
    role: String,
    host: String,
    name: String,
    host_sequence: usize,
    replica_sequence: usize,
    replicas: usize,
    config: IndexMap<String, Value>,
    service_config: IndexMap<String, Value>,
    variables: Variables,
    raw: ConfigLayer,
    /// Resolved cluster variables the unrendered config refers to
    cluster: BTreeMap<String, String>,
}

impl PartialEq for DeployConfig {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.id == other.id
            && self.role == other.role
            && self.host == other.host
            && self.name == other.name
            && self.host_sequence == other.host_sequence
            && self.replica_sequence == other.replica_sequence
            && self.replicas == other.replicas
            && self.raw == other.raw
            && self.cluster == other.cluster
    }
}

impl Eq for DeployConfig {}

/// Parameters of an instance before it is built.
#[derive(Debug, Clone)]
pub(crate) struct InstanceSpec<'a> {
    pub kind: Kind,
    pub role: &'a str,
    pub host: &'a str,
    pub name: Option<&'a str>,
    pub host_sequence: usize,
    pub replica_sequence: usize,
    pub replicas: usize,
    pub layer: &'a ConfigLayer,
}

impl DeployConfig {
    /// First build pass: apply defaults, register variables and resolve them.
    ///
    /// Config values are left unrendered; [`DeployConfig::finish`] renders
    /// them once cluster variables are known.
    pub(crate) fn prepare(spec: &InstanceSpec<'_>) -> TopologyResult<Self> {
        let defaults = DefaultContext {
            kind: spec.kind.as_str(),
            role: spec.role,
        };

        let mut config = spec.layer.values.clone();
        for item in DEPLOY_ITEMS.get_all() {
            if !config.contains_key(&item.key) {
                if let Some(value) = item.default.evaluate(&defaults) {
                    config.insert(item.key.clone(), value);
                }
            }
        }

        let name = spec
            .name
            .map(str::to_string)
            .unwrap_or_else(|| spec.host_sequence.to_string());
        let facts = ServiceFacts {
            kind: spec.kind.as_str(),
            role: spec.role,
            host: spec.host,
            name: &name,
            host_sequence: spec.host_sequence,
            replica_sequence: spec.replica_sequence,
            config: &config,
        };

        let location = || format!("{}[{}]", spec.role, spec.host_sequence);
        let mut variables = Variables::new();
        register_service_variables(&mut variables, &facts).map_err(|source| {
            TopologyError::Variable {
                id: location(),
                source,
            }
        })?;
        for (var_name, value) in &spec.layer.variables {
            variables
                .register(var_name.clone(), value.clone())
                .map_err(|source| TopologyError::Variable {
                    id: location(),
                    source,
                })?;
        }
        variables.build().map_err(|source| TopologyError::Variable {
            id: location(),
            source,
        })?;

        let host = variables
            .get("service_host")
            .map_err(|source| TopologyError::Variable {
                id: location(),
                source,
            })?
            .to_string();
        let name = variables
            .get("service_name")
            .map_err(|source| TopologyError::Variable {
                id: location(),
                source,
            })?
            .to_string();
        if host.is_empty() {
            return Err(TopologyError::MissingField {
                role: spec.role.to_string(),
                index: spec.host_sequence,
                field: "host",
            });
        }

        Ok(Self {
            kind: spec.kind,
            id: format_id(spec.role, &host, &name, spec.replica_sequence),
            parent_id: format_id(spec.role, &host, &name, 0),
            role: spec.role.to_string(),
            host,
            name,
            host_sequence: spec.host_sequence,
            replica_sequence: spec.replica_sequence,
            replicas: spec.replicas,
            config,
            service_config: IndexMap::new(),
            variables,
            raw: spec.layer.clone(),
            cluster: BTreeMap::new(),
        })
    }

    /// Resolved listen endpoints, read after the first pass.
    pub(crate) fn endpoint(&self) -> TopologyResult<Endpoint> {
        Endpoint::from_variables(
            &self.role,
            self.host_sequence,
            self.replica_sequence,
            &self.variables,
        )
        .map_err(|source| self.variable_error(source))
    }

    /// Register a cluster-wide variable computed after every instance passed
    /// its first build.
    ///
    /// Must run before [`DeployConfig::finish`]: whether the instance refers
    /// to the variable is read from the unrendered config.
    pub(crate) fn register_cluster_variable(
        &mut self,
        name: &str,
        value: &str,
    ) -> TopologyResult<()> {
        self.variables
            .register_resolved(name, value)
            .map_err(|source| self.variable_error(source))?;
        if self.refers_to(name) {
            self.cluster.insert(name.to_string(), value.to_string());
        }
        Ok(())
    }

    fn refers_to(&self, variable: &str) -> bool {
        let pattern = format!("${{{}}}", variable);
        let in_config = self.config.values().any(|value| match value {
            Value::String(s) => s.contains(&pattern),
            Value::List(items) => items.iter().any(|item| item.contains(&pattern)),
            _ => false,
        });
        in_config || self.raw.variables.values().any(|v| v.contains(&pattern))
    }

    /// Second build pass: render every value and coerce declared keys.
    pub(crate) fn finish(&mut self) -> TopologyResult<()> {
        let mut config = IndexMap::with_capacity(self.config.len());
        for (key, value) in &self.config {
            let rendered = match value {
                Value::String(s) => Value::String(
                    self.variables
                        .rendering(s)
                        .map_err(|source| self.variable_error(source))?,
                ),
                Value::List(items) => Value::List(
                    items
                        .iter()
                        .map(|item| self.variables.rendering(item))
                        .collect::<Result<_, _>>()
                        .map_err(|source| self.variable_error(source))?,
                ),
                other => other.clone(),
            };
            let coerced =
                DEPLOY_ITEMS
                    .build(key, rendered)
                    .map_err(|source| TopologyError::Coerce {
                        id: self.id.clone(),
                        source,
                    })?;
            config.insert(key.clone(), coerced);
        }

        self.service_config = config
            .iter()
            .filter(|(key, _)| DEPLOY_ITEMS.in_service_config(key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.config = config;
        Ok(())
    }

    fn variable_error(&self, source: crate::vars::VarsError) -> TopologyError {
        TopologyError::Variable {
            id: self.id.clone(),
            source,
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Unique instance id: `role_host_name_replicaSequence`
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Id shared by every replica of the same logical slot
    pub fn parent_id(&self) -> &str {
        &self.parent_id
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host_sequence(&self) -> usize {
        self.host_sequence
    }

    pub fn replica_sequence(&self) -> usize {
        self.replica_sequence
    }

    /// Number of replicas declared for this instance's slot
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Final typed configuration, including admin-only keys
    pub fn config(&self) -> &IndexMap<String, Value> {
        &self.config
    }

    /// Configuration passed to the service itself
    pub fn service_config(&self) -> &IndexMap<String, Value> {
        &self.service_config
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Look up a config value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    fn get_string(&self, key: &str) -> String {
        self.get(key).map(Value::to_string).unwrap_or_default()
    }

    pub fn container_image(&self) -> String {
        self.get_string(KEY_CONTAINER_IMAGE)
    }

    pub fn log_dir(&self) -> String {
        self.get_string(KEY_LOG_DIR)
    }

    pub fn data_dir(&self) -> String {
        self.get_string(KEY_DATA_DIR)
    }

    pub fn core_dir(&self) -> String {
        self.get_string(KEY_CORE_DIR)
    }

    /// Resolved listen address
    pub fn listen_ip(&self) -> &str {
        self.variables.get("service_addr").unwrap_or_default()
    }

    pub fn listen_port(&self) -> i64 {
        self.get(KEY_LISTEN_PORT)
            .and_then(Value::as_int)
            .unwrap_or_default()
    }

    /// Directory inside the container where the service lives
    pub fn project_prefix(&self) -> &str {
        self.variables.get("prefix").unwrap_or_default()
    }

    /// Name of the container running this instance
    pub fn container_name(&self) -> String {
        format!("{}-{}", self.kind.as_str(), self.id.replace('.', "-"))
    }

    /// Cluster variables this instance refers to, with their resolved values
    pub fn cluster_variables(&self) -> &BTreeMap<String, String> {
        &self.cluster
    }

    /// Stable content hash over the instance definition.
    ///
    /// Hashes the merged, unrendered configuration plus the resolved value
    /// of every cluster variable it refers to. Per-build values such as
    /// `${random_uuid}` never make identical input hash differently.
    pub fn content_hash(&self) -> String {
        self.hash_with(Some(&self.cluster))
    }

    /// Content hash ignoring cluster variables.
    ///
    /// Equal definition hashes with different content hashes mean only the
    /// rest of the cluster moved under this instance.
    pub fn definition_hash(&self) -> String {
        self.hash_with(None)
    }

    fn hash_with(&self, cluster: Option<&BTreeMap<String, String>>) -> String {
        #[derive(Serialize)]
        struct Hashed<'a> {
            kind: &'a str,
            role: &'a str,
            host: &'a str,
            name: &'a str,
            host_sequence: usize,
            replica_sequence: usize,
            replicas: usize,
            config: BTreeMap<&'a str, &'a Value>,
            variables: BTreeMap<&'a str, &'a str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            cluster: Option<&'a BTreeMap<String, String>>,
        }

        let hashed = Hashed {
            kind: self.kind.as_str(),
            role: &self.role,
            host: &self.host,
            name: &self.name,
            host_sequence: self.host_sequence,
            replica_sequence: self.replica_sequence,
            replicas: self.replicas,
            config: self
                .raw
                .values
                .iter()
                .map(|(k, v)| (k.as_str(), v))
                .collect(),
            variables: self
                .raw
                .variables
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect(),
            cluster,
        };

        let encoded = serde_json::to_vec(&hashed).unwrap_or_default();
        let digest = Sha256::digest(&encoded);
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Service configuration rendered as `key=value` lines.
    pub fn service_config_text(&self) -> String {
        let mut text = String::new();
        for (key, value) in &self.service_config {
            text.push_str(key);
            text.push('=');
            text.push_str(&value.to_string());
            text.push('\n');
        }
        text
    }
}
