//! Topology diffing.
//!
//! Instances are matched by id. Ids only in the old topology are deleted,
//! ids only in the new one are added, and ids in both whose content hash
//! differs are changed. A change whose definition is untouched, where only
//! the cluster variables the instance refers to moved, is flagged
//! `cluster_only`.

use std::collections::HashMap;
use std::fmt;

use similar::TextDiff;
use tracing::debug;

use super::{DeployConfig, Topology, TopologyResult};

/// Classification of one instance in a diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffType {
    Add,
    Delete,
    Change,
}

impl fmt::Display for DiffType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiffType::Add => "add",
            DiffType::Delete => "delete",
            DiffType::Change => "change",
        })
    }
}

/// One classified instance. Deleted instances carry their old config, added
/// and changed ones their new config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyDiff {
    pub diff_type: DiffType,
    pub deploy_config: DeployConfig,
    /// Set on changes caused only by cluster-wide variables
    pub cluster_only: bool,
}

impl TopologyDiff {
    fn new(diff_type: DiffType, deploy_config: &DeployConfig) -> Self {
        Self {
            diff_type,
            deploy_config: deploy_config.clone(),
            cluster_only: false,
        }
    }
}

/// Diff two lists of deploy configs.
///
/// Output order: deletions in old order, additions in new order, then
/// changes in new order.
pub fn diff_deploy_configs(old: &[DeployConfig], new: &[DeployConfig]) -> Vec<TopologyDiff> {
    let old_by_id: HashMap<&str, &DeployConfig> = old.iter().map(|dc| (dc.id(), dc)).collect();
    let new_by_id: HashMap<&str, &DeployConfig> = new.iter().map(|dc| (dc.id(), dc)).collect();

    let deleted = old
        .iter()
        .filter(|dc| !new_by_id.contains_key(dc.id()))
        .map(|dc| TopologyDiff::new(DiffType::Delete, dc));
    let added = new
        .iter()
        .filter(|dc| !old_by_id.contains_key(dc.id()))
        .map(|dc| TopologyDiff::new(DiffType::Add, dc));
    let changed = new.iter().filter_map(|dc| {
        let before = old_by_id.get(dc.id())?;
        if before.content_hash() == dc.content_hash() {
            return None;
        }
        Some(TopologyDiff {
            cluster_only: before.definition_hash() == dc.definition_hash(),
            ..TopologyDiff::new(DiffType::Change, dc)
        })
    });

    deleted.chain(added).chain(changed).collect()
}

fn parse_or_empty(text: &str) -> TopologyResult<Vec<DeployConfig>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    Topology::parse(text).map(Topology::into_deploy_configs)
}

/// Parse both topology texts and diff them.
///
/// Blank text stands for an empty topology, so the first commit of a
/// cluster diffs as all additions.
pub fn diff_topology(old_text: &str, new_text: &str) -> TopologyResult<Vec<TopologyDiff>> {
    let old = parse_or_empty(old_text)?;
    let new = parse_or_empty(new_text)?;
    let diffs = diff_deploy_configs(&old, &new);
    debug!(
        old = old.len(),
        new = new.len(),
        diffs = diffs.len(),
        "Diffed topologies"
    );
    Ok(diffs)
}

/// Counts and per-instance service config diffs, for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub added: usize,
    pub deleted: usize,
    pub changed: usize,
    pub unchanged: usize,
    /// Unified diff of the service config of each changed instance, by id
    pub changes: Vec<(String, String)>,
}

impl DiffSummary {
    /// Summarize the diff between two topologies.
    pub fn between(old: &[DeployConfig], new: &[DeployConfig]) -> Self {
        let old_by_id: HashMap<&str, &DeployConfig> = old.iter().map(|dc| (dc.id(), dc)).collect();
        let mut summary = DiffSummary::default();

        for diff in diff_deploy_configs(old, new) {
            match diff.diff_type {
                DiffType::Add => summary.added += 1,
                DiffType::Delete => summary.deleted += 1,
                DiffType::Change => {
                    summary.changed += 1;
                    let id = diff.deploy_config.id();
                    let before = old_by_id
                        .get(id)
                        .map(|dc| dc.service_config_text())
                        .unwrap_or_default();
                    let after = diff.deploy_config.service_config_text();
                    let text = TextDiff::from_lines(&before, &after)
                        .unified_diff()
                        .header(id, id)
                        .to_string();
                    summary.changes.push((id.to_string(), text));
                }
            }
        }

        summary.unchanged = new.len() - summary.added - summary.changed;
        summary
    }

    pub fn has_changes(&self) -> bool {
        self.added + self.deleted + self.changed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    fn topo(hosts: &[&str]) -> String {
        if hosts.is_empty() {
            return "kind: curvebs\nchunkserver_services:\n  deploy: []\n".to_string();
        }
        let mut text = String::from("kind: curvebs\nchunkserver_services:\n  deploy:\n");
        for host in hosts {
            text.push_str(&format!("    - host: {}\n", host));
        }
        text
    }

    fn ids(diffs: &[TopologyDiff], diff_type: DiffType) -> Vec<String> {
        diffs
            .iter()
            .filter(|d| d.diff_type == diff_type)
            .map(|d| d.deploy_config.id().to_string())
            .collect()
    }

    #[test]
    fn test_self_diff_is_empty() {
        let text = topo(&["h1", "h2"]);
        assert!(diff_topology(&text, &text).unwrap().is_empty());
    }

    #[test]
    fn test_replace_host_in_place() {
        let diffs = diff_topology(&topo(&["h1", "h2", "h3"]), &topo(&["h1", "h4", "h3"])).unwrap();
        assert_eq!(ids(&diffs, DiffType::Delete), vec!["chunkserver_h2_1_0"]);
        assert_eq!(ids(&diffs, DiffType::Add), vec!["chunkserver_h4_1_0"]);
        assert!(ids(&diffs, DiffType::Change).is_empty());
    }

    #[test]
    fn test_config_change_detected() {
        let old = topo(&["h1"]);
        let new = "kind: curvebs\nchunkserver_services:\n  config:\n    copysets: 50\n  deploy:\n    - host: h1\n";
        let diffs = diff_topology(&old, new).unwrap();
        assert_eq!(ids(&diffs, DiffType::Change), vec!["chunkserver_h1_0_0"]);
    }

    #[test]
    fn test_key_order_does_not_change_hash() {
        let a = "kind: curvebs\netcd_services:\n  config:\n    x: 1\n    y: 2\n  deploy:\n    - host: h1\n";
        let b = "kind: curvebs\netcd_services:\n  config:\n    y: 2\n    x: 1\n  deploy:\n    - host: h1\n";
        assert!(diff_topology(a, b).unwrap().is_empty());
    }

    #[test]
    fn test_random_uuid_does_not_change_hash() {
        let text = "kind: curvebs\netcd_services:\n  config:\n    token: ${random_uuid}\n  deploy:\n    - host: h1\n";
        assert!(diff_topology(text, text).unwrap().is_empty());
    }

    #[test]
    fn test_cluster_variable_change_detected() {
        let mds = "mds_services:\n  config:\n    mds.etcd_endpoint: ${cluster_etcd_addr}\n  deploy:\n    - host: m1\n";
        let old = format!("kind: curvebs\netcd_services:\n  deploy:\n    - host: e1\n{}", mds);
        let new = format!("kind: curvebs\netcd_services:\n  deploy:\n    - host: e1\n    - host: e2\n{}", mds);
        let diffs = diff_topology(&old, &new).unwrap();

        assert_eq!(ids(&diffs, DiffType::Add), vec!["etcd_e2_1_0"]);
        assert_eq!(ids(&diffs, DiffType::Change), vec!["mds_m1_0_0"]);
        let change = diffs
            .iter()
            .find(|d| d.diff_type == DiffType::Change)
            .unwrap();
        assert!(change.cluster_only);
        assert_eq!(
            change.deploy_config.cluster_variables()["cluster_etcd_addr"],
            "e1:2379,e2:2379"
        );
    }

    #[test]
    fn test_unreferenced_cluster_variable_ignored() {
        let diffs = diff_topology(
            "kind: curvebs\netcd_services:\n  deploy:\n    - host: e1\nmds_services:\n  deploy:\n    - host: m1\n",
            "kind: curvebs\netcd_services:\n  deploy:\n    - host: e1\n    - host: e2\nmds_services:\n  deploy:\n    - host: m1\n",
        )
        .unwrap();
        assert!(ids(&diffs, DiffType::Change).is_empty());
    }

    #[test]
    fn test_definition_change_is_not_cluster_only() {
        let old = topo(&["h1"]);
        let new = "kind: curvebs\nchunkserver_services:\n  config:\n    copysets: 50\n  deploy:\n    - host: h1\n";
        let diffs = diff_topology(&old, new).unwrap();
        assert!(!diffs[0].cluster_only);
    }

    #[test]
    fn test_blank_old_topology_adds_everything() {
        let diffs = diff_topology("", &topo(&["h1", "h2"])).unwrap();
        assert_eq!(ids(&diffs, DiffType::Add).len(), 2);
    }

    #[test]
    fn test_parse_errors_propagate() {
        assert!(diff_topology("kind: bad\n", &topo(&["h1"])).is_err());
        assert!(diff_topology(&topo(&["h1"]), "kind: bad\n").is_err());
    }

    #[test]
    fn test_summary() {
        let old_text = "kind: curvebs\netcd_services:\n  deploy:\n    - host: h1\n    - host: h2\n";
        let new_text = "kind: curvebs\netcd_services:\n  config:\n    election_timeout: 10\n  deploy:\n    - host: h1\n    - host: h2\n    - host: h3\n";
        let old = Topology::parse(old_text).unwrap().into_deploy_configs();
        let new = Topology::parse(new_text).unwrap().into_deploy_configs();

        let summary = DiffSummary::between(&old, &new);
        assert_eq!(summary.added, 1);
        assert_eq!(summary.changed, 2);
        assert_eq!(summary.unchanged, 0);
        assert!(summary.changes[0].1.contains("+election_timeout=10"));
    }

    fn partition_holds(old_hosts: &[&str], new_hosts: &[&str]) {
        let old = Topology::parse(&topo(old_hosts)).unwrap().into_deploy_configs();
        let new = Topology::parse(&topo(new_hosts)).unwrap().into_deploy_configs();
        let diffs = diff_deploy_configs(&old, &new);

        let old_ids: HashSet<_> = old.iter().map(|dc| dc.id().to_string()).collect();
        let new_ids: HashSet<_> = new.iter().map(|dc| dc.id().to_string()).collect();
        let added: HashSet<_> = ids(&diffs, DiffType::Add).into_iter().collect();
        let deleted: HashSet<_> = ids(&diffs, DiffType::Delete).into_iter().collect();
        let common: HashSet<_> = old_ids.intersection(&new_ids).cloned().collect();

        assert_eq!(&added, &new_ids.difference(&old_ids).cloned().collect());
        assert_eq!(&deleted, &old_ids.difference(&new_ids).cloned().collect());
        assert!(added.is_disjoint(&common) && deleted.is_disjoint(&common));
        let union: HashSet<_> = old_ids.union(&new_ids).cloned().collect();
        assert_eq!(added.len() + deleted.len() + common.len(), union.len());
    }

    #[test]
    fn test_partition() {
        partition_holds(&["h1", "h2"], &["h2", "h3", "h4"]);
        partition_holds(&[], &["h1"]);
        partition_holds(&["h1", "h2", "h3"], &["h1"]);
    }
}
