//! Topology parsing for storadm.
//!
//! A topology is a three-level description of a cluster:
//!
//! ```yaml
//! kind: curvebs
//! global:
//!   container_image: opencurvedocker/curvebs:v1.2
//!   variable:
//!     home: /tmp
//! etcd_services:
//!   config:
//!     listen.port: 2380
//!   deploy:
//!     - host: server-1
//!     - host: server-2
//!       replica: 2
//! ```
//!
//! Parsing merges `global` into every role's service `config`, the service
//! config into every `deploy` entry, then expands replicas into one
//! [`DeployConfig`] per instance. Building is two-phase: every instance
//! resolves its own variables first, then cluster-wide variables (which need
//! every instance's listen address) are registered and config values are
//! rendered and type-checked.

pub mod deploy;
pub mod diff;
pub mod plan;
pub mod variables;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::configure::layer::{ConfigLayer, LayerError};
use crate::configure::{DefaultValue, Item, ItemError, RequiredType};
use crate::value::Value;
use crate::vars::VarsError;

pub use deploy::{format_id, DeployConfig};
pub use diff::{diff_topology, DiffSummary, DiffType, TopologyDiff};
pub use plan::{plan_migration, plan_scale_out, MigrateServer, PlanError};

pub const ROLE_ETCD: &str = "etcd";
pub const ROLE_MDS: &str = "mds";
pub const ROLE_CHUNKSERVER: &str = "chunkserver";
pub const ROLE_SNAPSHOTCLONE: &str = "snapshotclone";
pub const ROLE_METASERVER: &str = "metaserver";

const SERVICES_SUFFIX: &str = "_services";

/// Errors that can occur while parsing a topology
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("malformed topology: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unsupported kind '{0}'")]
    UnsupportedKind(String),

    #[error("'{block}' is not a valid service block for kind '{kind}'")]
    UnknownServiceBlock { kind: String, block: String },

    #[error("{role} deploy #{index}: missing required field '{field}'")]
    MissingField {
        role: String,
        index: usize,
        field: &'static str,
    },

    #[error("{location}: {source}")]
    Layer {
        location: String,
        #[source]
        source: LayerError,
    },

    #[error("{id}: {source}")]
    Coerce {
        id: String,
        #[source]
        source: ItemError,
    },

    #[error("{id}: {source}")]
    Variable {
        id: String,
        #[source]
        source: VarsError,
    },

    #[error("duplicate service id '{0}'")]
    DuplicateId(String),
}

/// Result type for topology operations
pub type TopologyResult<T> = Result<T, TopologyError>;

/// Storage-system variant; selects the valid role set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    CurveBs,
    CurveFs,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::CurveBs => "curvebs",
            Kind::CurveFs => "curvefs",
        }
    }

    /// Roles in start order.
    pub fn roles(&self) -> &'static [&'static str] {
        match self {
            Kind::CurveBs => &[ROLE_ETCD, ROLE_MDS, ROLE_CHUNKSERVER, ROLE_SNAPSHOTCLONE],
            Kind::CurveFs => &[ROLE_ETCD, ROLE_MDS, ROLE_METASERVER],
        }
    }

    /// Role whose instances hold data and belong to pools
    pub fn storage_role(&self) -> &'static str {
        match self {
            Kind::CurveBs => ROLE_CHUNKSERVER,
            Kind::CurveFs => ROLE_METASERVER,
        }
    }

    pub fn supports_role(&self, role: &str) -> bool {
        self.roles().contains(&role)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "curvebs" => Ok(Kind::CurveBs),
            "curvefs" => Ok(Kind::CurveFs),
            other => Err(TopologyError::UnsupportedKind(other.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TopologyDoc {
    kind: String,
    #[serde(default)]
    global: serde_yaml::Mapping,
    #[serde(flatten)]
    services: indexmap::IndexMap<String, ServicesDoc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServicesDoc {
    #[serde(default)]
    config: serde_yaml::Mapping,
    #[serde(default)]
    deploy: Vec<DeployDoc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeployDoc {
    host: Option<serde_yaml::Value>,
    name: Option<serde_yaml::Value>,
    #[serde(alias = "replicas")]
    replica: Option<serde_yaml::Value>,
    #[serde(default)]
    config: serde_yaml::Mapping,
}

/// A parsed topology: every instance, in role order then declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    kind: Kind,
    deploy_configs: Vec<DeployConfig>,
}

impl Topology {
    /// Parse topology text into a fully built topology.
    ///
    /// Any error aborts the whole parse; no partial topology is returned.
    #[instrument(skip(text), fields(len = text.len()))]
    pub fn parse(text: &str) -> TopologyResult<Self> {
        let doc: TopologyDoc = serde_yaml::from_str(text)?;
        let kind: Kind = doc.kind.parse()?;

        for block in doc.services.keys() {
            let supported = block
                .strip_suffix(SERVICES_SUFFIX)
                .map_or(false, |role| kind.supports_role(role));
            if !supported {
                return Err(TopologyError::UnknownServiceBlock {
                    kind: kind.to_string(),
                    block: block.clone(),
                });
            }
        }

        let global =
            ConfigLayer::from_mapping(&doc.global).map_err(|source| TopologyError::Layer {
                location: "global".to_string(),
                source,
            })?;

        let mut deploy_configs = Vec::new();
        for role in kind.roles() {
            let Some(services) = doc.services.get(&format!("{}{}", role, SERVICES_SUFFIX)) else {
                continue;
            };
            let service = ConfigLayer::from_mapping(&services.config)
                .map_err(|source| TopologyError::Layer {
                    location: format!("{}{}.config", role, SERVICES_SUFFIX),
                    source,
                })?
                .inherited(&global);

            for (host_sequence, entry) in services.deploy.iter().enumerate() {
                deploy_configs.extend(expand_deploy(kind, role, host_sequence, entry, &service)?);
            }
        }

        let mut ids = HashSet::new();
        for dc in &deploy_configs {
            if !ids.insert(dc.id().to_string()) {
                return Err(TopologyError::DuplicateId(dc.id().to_string()));
            }
        }

        let endpoints = deploy_configs
            .iter()
            .map(DeployConfig::endpoint)
            .collect::<TopologyResult<Vec<_>>>()?;
        let cluster = variables::cluster_variables(&endpoints);
        for dc in &mut deploy_configs {
            for (name, value) in &cluster {
                dc.register_cluster_variable(name, value)?;
            }
            dc.finish()?;
        }

        debug!(kind = %kind, instances = deploy_configs.len(), "Parsed topology");
        Ok(Self {
            kind,
            deploy_configs,
        })
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn deploy_configs(&self) -> &[DeployConfig] {
        &self.deploy_configs
    }

    pub fn into_deploy_configs(self) -> Vec<DeployConfig> {
        self.deploy_configs
    }

    /// Instances of one role, in declaration order.
    pub fn filter_role<'a>(&'a self, role: &'a str) -> impl Iterator<Item = &'a DeployConfig> {
        self.deploy_configs.iter().filter(move |dc| dc.role() == role)
    }

    /// Look up an instance by id.
    pub fn get(&self, id: &str) -> Option<&DeployConfig> {
        self.deploy_configs.iter().find(|dc| dc.id() == id)
    }

    pub fn len(&self) -> usize {
        self.deploy_configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deploy_configs.is_empty()
    }
}

/// Parse topology text into its flat list of deploy configs.
pub fn parse_topology(text: &str) -> TopologyResult<Vec<DeployConfig>> {
    Topology::parse(text).map(Topology::into_deploy_configs)
}

fn expand_deploy(
    kind: Kind,
    role: &str,
    host_sequence: usize,
    entry: &DeployDoc,
    service: &ConfigLayer,
) -> TopologyResult<Vec<DeployConfig>> {
    let missing = |field| TopologyError::MissingField {
        role: role.to_string(),
        index: host_sequence,
        field,
    };
    let host = entry
        .host
        .as_ref()
        .and_then(Value::from_yaml)
        .map(|v| v.to_string())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| missing("host"))?;
    let name = entry
        .name
        .as_ref()
        .and_then(Value::from_yaml)
        .map(|v| v.to_string());

    let replicas = match entry.replica.as_ref() {
        None => 1,
        Some(raw) => {
            let value = Value::from_yaml(raw).ok_or_else(|| missing("replica"))?;
            let replicas =
                positive("replica", value).map_err(|source| TopologyError::Coerce {
                    id: format!("{}[{}]", role, host_sequence),
                    source,
                })?;
            replicas as usize
        }
    };

    let layer = ConfigLayer::from_mapping(&entry.config)
        .map_err(|source| TopologyError::Layer {
            location: format!("{}{}.deploy[{}]", role, SERVICES_SUFFIX, host_sequence),
            source,
        })?
        .inherited(service);

    (0..replicas)
        .map(|replica_sequence| {
            DeployConfig::prepare(&deploy::InstanceSpec {
                kind,
                role,
                host: &host,
                name: name.as_deref(),
                host_sequence,
                replica_sequence,
                replicas,
                layer: &layer,
            })
        })
        .collect()
}

fn positive(key: &str, value: Value) -> Result<i64, ItemError> {
    let item = Item {
        key: key.to_string(),
        required_type: RequiredType::PositiveInt,
        exclude: true,
        default: DefaultValue::None,
    };
    item.coerce(value).map(|v| v.as_int().unwrap_or(1))
}
