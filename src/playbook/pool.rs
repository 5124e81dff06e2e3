//! Cluster map handed to the storage system when creating pools.
//!
//! Every storage instance (chunkserver for curvebs, metaserver for curvefs)
//! becomes a server placed in one of up to three zones by host sequence. A
//! migration substitutes each new instance for the old one it replaces.

use serde::Serialize;

use crate::configure::catalog::{KEY_COPYSETS, KEY_LISTEN_EXTERNAL_IP, KEY_LISTEN_EXTERNAL_PORT};
use crate::topology::{DeployConfig, Kind, MigrateServer};

const DEFAULT_POOL: &str = "pool1";
const MAX_ZONES: usize = 3;
const SEGMENT_SIZE: u64 = 1 << 30;

/// Which pools a cluster map describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Physical,
    Logical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Server {
    pub name: String,
    pub internalip: String,
    pub internalport: i64,
    pub externalip: String,
    pub externalport: i64,
    pub zone: String,
    #[serde(rename = "physicalpool", skip_serializing_if = "Option::is_none")]
    pub physical_pool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalPool {
    pub name: String,
    #[serde(rename = "physicalpool")]
    pub physical_pool: String,
    pub segment_size: u64,
    #[serde(rename = "copysetnum")]
    pub copysets: i64,
    #[serde(rename = "replicasnum")]
    pub replicas: usize,
    #[serde(rename = "type")]
    pub pool_type: u8,
    #[serde(rename = "scatterwidth")]
    pub scatter_width: usize,
    #[serde(rename = "zonenum")]
    pub zones: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FsPool {
    pub name: String,
    #[serde(rename = "replicasnum")]
    pub replicas: usize,
    #[serde(rename = "copysetnum")]
    pub copysets: i64,
    #[serde(rename = "zonenum")]
    pub zones: usize,
}

/// Cluster map serialized for the pool creation tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ClusterMap {
    Bs {
        servers: Vec<Server>,
        #[serde(rename = "logicalpools", skip_serializing_if = "Vec::is_empty")]
        logical_pools: Vec<LogicalPool>,
        npools: usize,
    },
    Fs {
        servers: Vec<Server>,
        pools: Vec<FsPool>,
    },
}

impl ClusterMap {
    /// Build the cluster map for the storage instances in `configs`.
    ///
    /// Instances of other roles are ignored. `migrates` replaces each
    /// migrated instance with its successor.
    pub fn build(
        kind: Kind,
        configs: &[DeployConfig],
        migrates: &[MigrateServer],
        pool_kind: PoolKind,
    ) -> Self {
        let storage_role = kind.storage_role();
        let instances: Vec<&DeployConfig> = configs
            .iter()
            .filter(|dc| dc.role() == storage_role)
            .map(|dc| {
                migrates
                    .iter()
                    .find(|m| m.from.id() == dc.id())
                    .map_or(dc, |m| &m.to)
            })
            .collect();

        let mut hosts: Vec<usize> = instances.iter().map(|dc| dc.host_sequence()).collect();
        hosts.sort_unstable();
        hosts.dedup();
        let zones = hosts.len().clamp(1, MAX_ZONES);
        let replicas = zones;

        let servers = instances
            .iter()
            .map(|dc| {
                let zone = format!("zone{}", dc.host_sequence() % zones + 1);
                let external_ip = dc
                    .get(KEY_LISTEN_EXTERNAL_IP)
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| dc.listen_ip().to_string());
                let external_port = dc
                    .get(KEY_LISTEN_EXTERNAL_PORT)
                    .and_then(|v| v.as_int())
                    .unwrap_or_else(|| dc.listen_port());
                Server {
                    name: format!("server_{}_{}_{}", dc.host(), dc.name(), dc.replica_sequence()),
                    internalip: dc.listen_ip().to_string(),
                    internalport: dc.listen_port(),
                    externalip: external_ip,
                    externalport: external_port,
                    zone,
                    physical_pool: (kind == Kind::CurveBs).then(|| DEFAULT_POOL.to_string()),
                    pool: (kind == Kind::CurveFs).then(|| DEFAULT_POOL.to_string()),
                }
            })
            .collect::<Vec<_>>();

        let copysets: i64 = instances
            .iter()
            .map(|dc| dc.get(KEY_COPYSETS).and_then(|v| v.as_int()).unwrap_or(100))
            .sum::<i64>()
            / replicas as i64;

        match kind {
            Kind::CurveBs => ClusterMap::Bs {
                servers,
                logical_pools: match pool_kind {
                    PoolKind::Physical => Vec::new(),
                    PoolKind::Logical => vec![LogicalPool {
                        name: DEFAULT_POOL.to_string(),
                        physical_pool: DEFAULT_POOL.to_string(),
                        segment_size: SEGMENT_SIZE,
                        copysets: copysets.max(1),
                        replicas,
                        pool_type: 0,
                        scatter_width: 0,
                        zones,
                    }],
                },
                npools: 1,
            },
            Kind::CurveFs => ClusterMap::Fs {
                servers,
                pools: vec![FsPool {
                    name: DEFAULT_POOL.to_string(),
                    replicas,
                    copysets: copysets.max(1),
                    zones,
                }],
            },
        }
    }

    pub fn servers(&self) -> &[Server] {
        match self {
            ClusterMap::Bs { servers, .. } | ClusterMap::Fs { servers, .. } => servers,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
