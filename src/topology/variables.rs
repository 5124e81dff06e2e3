//! Built-in variables available to every deploy config.
//!
//! Service variables are registered per instance before its first build.
//! Cluster variables depend on the resolved listen addresses of every
//! instance and are registered in a second pass.

use indexmap::IndexMap;

use crate::configure::catalog::{
    KEY_CORE_DIR, KEY_DATA_DIR, KEY_LISTEN_CLIENT_PORT, KEY_LISTEN_DUMMY_PORT,
    KEY_LISTEN_EXTERNAL_IP, KEY_LISTEN_EXTERNAL_PORT, KEY_LISTEN_IP, KEY_LISTEN_PORT,
    KEY_LISTEN_PROXY_PORT, KEY_LOG_DIR,
};
use crate::value::Value;
use crate::vars::{Variables, VarsResult};

use super::{ROLE_CHUNKSERVER, ROLE_ETCD, ROLE_MDS, ROLE_METASERVER, ROLE_SNAPSHOTCLONE};

/// Instance facts the service variables are computed from.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ServiceFacts<'a> {
    pub kind: &'a str,
    pub role: &'a str,
    pub host: &'a str,
    pub name: &'a str,
    pub host_sequence: usize,
    pub replica_sequence: usize,
    pub config: &'a IndexMap<String, Value>,
}

impl ServiceFacts<'_> {
    fn config_value(&self, key: &str) -> String {
        self.config.get(key).map(Value::to_string).unwrap_or_default()
    }
}

struct ServiceVariable {
    name: &'static str,
    lookup: fn(&ServiceFacts<'_>) -> String,
}

const SERVICE_VARIABLES: &[ServiceVariable] = &[
    ServiceVariable {
        name: "prefix",
        lookup: |f| format!("/{}/{}", f.kind, f.role),
    },
    ServiceVariable {
        name: "service_id",
        lookup: |_| {
            "${service_role}_${service_host}_${service_name}_${service_replica_sequence}".into()
        },
    },
    ServiceVariable {
        name: "service_role",
        lookup: |f| f.role.to_string(),
    },
    ServiceVariable {
        name: "service_host",
        lookup: |f| f.host.to_string(),
    },
    ServiceVariable {
        name: "service_name",
        lookup: |f| f.name.to_string(),
    },
    ServiceVariable {
        name: "service_host_sequence",
        lookup: |f| f.host_sequence.to_string(),
    },
    ServiceVariable {
        name: "service_replica_sequence",
        lookup: |f| f.replica_sequence.to_string(),
    },
    ServiceVariable {
        name: "service_replicas_sequence",
        lookup: |f| f.replica_sequence.to_string(),
    },
    ServiceVariable {
        name: "format_host_sequence",
        lookup: |f| format!("{:02}", f.host_sequence),
    },
    ServiceVariable {
        name: "format_replica_sequence",
        lookup: |f| format!("{:02}", f.replica_sequence),
    },
    ServiceVariable {
        name: "format_replicas_sequence",
        lookup: |f| format!("{:02}", f.replica_sequence),
    },
    ServiceVariable {
        name: "service_addr",
        lookup: |f| f.config_value(KEY_LISTEN_IP),
    },
    ServiceVariable {
        name: "service_port",
        lookup: |f| f.config_value(KEY_LISTEN_PORT),
    },
    ServiceVariable {
        name: "service_client_port",
        lookup: |f| f.config_value(KEY_LISTEN_CLIENT_PORT),
    },
    ServiceVariable {
        name: "service_dummy_port",
        lookup: |f| f.config_value(KEY_LISTEN_DUMMY_PORT),
    },
    ServiceVariable {
        name: "service_proxy_port",
        lookup: |f| f.config_value(KEY_LISTEN_PROXY_PORT),
    },
    ServiceVariable {
        name: "service_external_addr",
        lookup: |f| f.config_value(KEY_LISTEN_EXTERNAL_IP),
    },
    ServiceVariable {
        name: "service_external_port",
        lookup: |f| f.config_value(KEY_LISTEN_EXTERNAL_PORT),
    },
    ServiceVariable {
        name: "log_dir",
        lookup: |f| f.config_value(KEY_LOG_DIR),
    },
    ServiceVariable {
        name: "data_dir",
        lookup: |f| f.config_value(KEY_DATA_DIR),
    },
    ServiceVariable {
        name: "core_dir",
        lookup: |f| f.config_value(KEY_CORE_DIR),
    },
    ServiceVariable {
        name: "random_uuid",
        lookup: |_| uuid::Uuid::new_v4().simple().to_string(),
    },
];

/// Register the built-in service variables for one instance.
pub(crate) fn register_service_variables(
    vars: &mut Variables,
    facts: &ServiceFacts<'_>,
) -> VarsResult<()> {
    for variable in SERVICE_VARIABLES {
        vars.register(variable.name, (variable.lookup)(facts))?;
    }
    Ok(())
}

/// Resolved listen endpoints of one built instance.
#[derive(Debug, Clone, Default)]
pub(crate) struct Endpoint {
    pub role: String,
    pub host_sequence: usize,
    pub replica_sequence: usize,
    pub addr: String,
    pub port: String,
    pub client_port: String,
    pub dummy_port: String,
    pub proxy_port: String,
}

impl Endpoint {
    pub fn from_variables(
        role: &str,
        host_sequence: usize,
        replica_sequence: usize,
        vars: &Variables,
    ) -> VarsResult<Self> {
        Ok(Self {
            role: role.to_string(),
            host_sequence,
            replica_sequence,
            addr: vars.get("service_addr")?.to_string(),
            port: vars.get("service_port")?.to_string(),
            client_port: vars.get("service_client_port")?.to_string(),
            dummy_port: vars.get("service_dummy_port")?.to_string(),
            proxy_port: vars.get("service_proxy_port")?.to_string(),
        })
    }
}

fn join<F>(endpoints: &[Endpoint], role: &str, f: F) -> String
where
    F: Fn(&Endpoint) -> String,
{
    endpoints
        .iter()
        .filter(|e| e.role == role)
        .map(f)
        .collect::<Vec<_>>()
        .join(",")
}

/// Compute the cluster-wide variables from every instance's endpoints.
pub(crate) fn cluster_variables(endpoints: &[Endpoint]) -> Vec<(&'static str, String)> {
    vec![
        (
            "cluster_etcd_http_addr",
            join(endpoints, ROLE_ETCD, |e| {
                format!(
                    "etcd{}{}=http://{}:{}",
                    e.host_sequence, e.replica_sequence, e.addr, e.port
                )
            }),
        ),
        (
            "cluster_etcd_addr",
            join(endpoints, ROLE_ETCD, |e| format!("{}:{}", e.addr, e.client_port)),
        ),
        (
            "cluster_mds_addr",
            join(endpoints, ROLE_MDS, |e| format!("{}:{}", e.addr, e.port)),
        ),
        (
            "cluster_mds_dummy_addr",
            join(endpoints, ROLE_MDS, |e| format!("{}:{}", e.addr, e.dummy_port)),
        ),
        (
            "cluster_mds_dummy_port",
            join(endpoints, ROLE_MDS, |e| e.dummy_port.clone()),
        ),
        (
            "cluster_chunkserver_addr",
            join(endpoints, ROLE_CHUNKSERVER, |e| format!("{}:{}", e.addr, e.port)),
        ),
        (
            "cluster_snapshotclone_addr",
            join(endpoints, ROLE_SNAPSHOTCLONE, |e| {
                format!("{}:{}", e.addr, e.port)
            }),
        ),
        (
            "cluster_snapshotclone_dummy_port",
            join(endpoints, ROLE_SNAPSHOTCLONE, |e| e.dummy_port.clone()),
        ),
        (
            "cluster_snapshotclone_proxy_addr",
            join(endpoints, ROLE_SNAPSHOTCLONE, |e| {
                format!("{}:{}", e.addr, e.proxy_port)
            }),
        ),
        (
            "cluster_metaserver_addr",
            join(endpoints, ROLE_METASERVER, |e| format!("{}:{}", e.addr, e.port)),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(role: &str, seq: usize, addr: &str) -> Endpoint {
        Endpoint {
            role: role.into(),
            host_sequence: seq,
            replica_sequence: 0,
            addr: addr.into(),
            port: "2380".into(),
            client_port: "2379".into(),
            dummy_port: "7700".into(),
            proxy_port: String::new(),
        }
    }

    #[test]
    fn test_cluster_variables_join_by_role() {
        let endpoints = vec![
            endpoint(ROLE_ETCD, 0, "10.0.0.1"),
            endpoint(ROLE_ETCD, 1, "10.0.0.2"),
            endpoint(ROLE_MDS, 0, "10.0.0.1"),
        ];
        let vars: IndexMap<_, _> = cluster_variables(&endpoints).into_iter().collect();

        assert_eq!(vars["cluster_etcd_addr"], "10.0.0.1:2379,10.0.0.2:2379");
        assert_eq!(
            vars["cluster_etcd_http_addr"],
            "etcd00=http://10.0.0.1:2380,etcd10=http://10.0.0.2:2380"
        );
        assert_eq!(vars["cluster_mds_dummy_addr"], "10.0.0.1:7700");
        assert_eq!(vars["cluster_metaserver_addr"], "");
    }

    #[test]
    fn test_service_variables_resolve() {
        let mut config = IndexMap::new();
        config.insert(KEY_LISTEN_IP.to_string(), Value::from("${service_host}"));
        config.insert(KEY_LISTEN_PORT.to_string(), Value::from("82${format_replica_sequence}"));
        let facts = ServiceFacts {
            kind: "curvebs",
            role: "chunkserver",
            host: "10.0.0.9",
            name: "0",
            host_sequence: 0,
            replica_sequence: 3,
            config: &config,
        };

        let mut vars = Variables::new();
        register_service_variables(&mut vars, &facts).unwrap();
        vars.build().unwrap();

        assert_eq!(vars.get("service_addr").unwrap(), "10.0.0.9");
        assert_eq!(vars.get("service_port").unwrap(), "8203");
        assert_eq!(vars.get("service_id").unwrap(), "chunkserver_10.0.0.9_0_3");
        assert_eq!(vars.get("prefix").unwrap(), "/curvebs/chunkserver");
        assert_eq!(vars.get("service_client_port").unwrap(), "");
    }
}
