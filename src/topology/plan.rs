//! Migration and scale-out planning from topology diffs.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use super::{DeployConfig, DiffType, TopologyDiff};

/// Errors rejecting a diff as a migration or scale-out
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("topology has no changes")]
    NoChanges,

    #[error("changing existing services is not allowed here: {0}")]
    ChangedServices(String),

    #[error("migration must delete and add the same number of services (deleted {deleted}, added {added})")]
    CountMismatch { deleted: usize, added: usize },

    #[error("all services must belong to one role, found {}", roles.join(", "))]
    MixedRoles { roles: Vec<String> },

    #[error("'{parent_id}' must be migrated as a whole: {expected} replicas declared, {found} changed")]
    PartialSlot {
        parent_id: String,
        expected: usize,
        found: usize,
    },

    #[error("scale-out cannot delete services: {0}")]
    DeletedServices(String),
}

/// One instance replaced by another during a migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateServer {
    pub from: DeployConfig,
    pub to: DeployConfig,
}

/// Split a diff by type. Changes caused only by cluster variables are
/// dropped: the instance itself is untouched by the plan.
fn split(diffs: &[TopologyDiff]) -> (Vec<&DeployConfig>, Vec<&DeployConfig>, Vec<&DeployConfig>) {
    let mut added = Vec::new();
    let mut deleted = Vec::new();
    let mut changed = Vec::new();
    for diff in diffs {
        match diff.diff_type {
            DiffType::Add => added.push(&diff.deploy_config),
            DiffType::Delete => deleted.push(&diff.deploy_config),
            DiffType::Change if diff.cluster_only => {}
            DiffType::Change => changed.push(&diff.deploy_config),
        }
    }
    (added, deleted, changed)
}

fn ids(configs: &[&DeployConfig]) -> String {
    configs
        .iter()
        .map(|dc| dc.id())
        .collect::<Vec<_>>()
        .join(", ")
}

fn require_one_role(configs: &[&DeployConfig]) -> Result<(), PlanError> {
    let roles: BTreeSet<&str> = configs.iter().map(|dc| dc.role()).collect();
    if roles.len() > 1 {
        return Err(PlanError::MixedRoles {
            roles: roles.into_iter().map(str::to_string).collect(),
        });
    }
    Ok(())
}

/// Sort by slot, checking every slot is covered by all of its replicas.
fn whole_slots<'a>(configs: &[&'a DeployConfig]) -> Result<Vec<&'a DeployConfig>, PlanError> {
    let mut slots: BTreeMap<&str, Vec<&DeployConfig>> = BTreeMap::new();
    for dc in configs {
        slots.entry(dc.parent_id()).or_default().push(dc);
    }

    let mut ordered = Vec::with_capacity(configs.len());
    for (parent_id, mut members) in slots {
        let expected = members[0].replicas();
        if members.len() != expected {
            return Err(PlanError::PartialSlot {
                parent_id: parent_id.to_string(),
                expected,
                found: members.len(),
            });
        }
        members.sort_by_key(|dc| dc.replica_sequence());
        ordered.extend(members);
    }
    Ok(ordered)
}

/// Pair deleted instances with added ones.
///
/// The diff may only add and delete instances, in equal number, of a single
/// role, and each side must cover whole slots. Pairs are formed in
/// (slot, replica) order.
pub fn plan_migration(diffs: &[TopologyDiff]) -> Result<Vec<MigrateServer>, PlanError> {
    let (added, deleted, changed) = split(diffs);
    if !changed.is_empty() {
        return Err(PlanError::ChangedServices(ids(&changed)));
    }
    if added.is_empty() && deleted.is_empty() {
        return Err(PlanError::NoChanges);
    }
    if added.len() != deleted.len() {
        return Err(PlanError::CountMismatch {
            deleted: deleted.len(),
            added: added.len(),
        });
    }

    let all: Vec<&DeployConfig> = added.iter().chain(deleted.iter()).copied().collect();
    require_one_role(&all)?;

    let from = whole_slots(&deleted)?;
    let to = whole_slots(&added)?;
    Ok(from
        .into_iter()
        .zip(to)
        .map(|(from, to)| MigrateServer {
            from: from.clone(),
            to: to.clone(),
        })
        .collect())
}

/// Collect the instances added by a scale-out.
pub fn plan_scale_out(diffs: &[TopologyDiff]) -> Result<Vec<DeployConfig>, PlanError> {
    let (added, deleted, changed) = split(diffs);
    if !changed.is_empty() {
        return Err(PlanError::ChangedServices(ids(&changed)));
    }
    if !deleted.is_empty() {
        return Err(PlanError::DeletedServices(ids(&deleted)));
    }
    if added.is_empty() {
        return Err(PlanError::NoChanges);
    }
    require_one_role(&added)?;
    Ok(added.into_iter().cloned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::diff_topology;

    fn chunkservers(hosts: &[(&str, usize)]) -> String {
        let mut text = String::from("kind: curvebs\netcd_services:\n  deploy:\n    - host: e1\nchunkserver_services:\n  deploy:\n");
        for (host, replicas) in hosts {
            text.push_str(&format!("    - host: {}\n      replicas: {}\n", host, replicas));
        }
        text
    }

    #[test]
    fn test_migration_pairs_in_order() {
        let old = chunkservers(&[("h1", 1), ("h2", 2), ("h3", 1)]);
        let new = chunkservers(&[("h1", 1), ("h4", 2), ("h3", 1)]);
        let plan = plan_migration(&diff_topology(&old, &new).unwrap()).unwrap();

        let pairs: Vec<_> = plan
            .iter()
            .map(|m| (m.from.id().to_string(), m.to.id().to_string()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("chunkserver_h2_1_0".to_string(), "chunkserver_h4_1_0".to_string()),
                ("chunkserver_h2_1_1".to_string(), "chunkserver_h4_1_1".to_string()),
            ]
        );
    }

    #[test]
    fn test_migration_count_mismatch_both_directions() {
        let base = chunkservers(&[("h1", 1), ("h2", 1)]);
        let grown = chunkservers(&[("h1", 1), ("h2", 1), ("h3", 1)]);

        assert_eq!(
            plan_migration(&diff_topology(&base, &grown).unwrap()),
            Err(PlanError::CountMismatch {
                deleted: 0,
                added: 1
            })
        );
        assert_eq!(
            plan_migration(&diff_topology(&grown, &base).unwrap()),
            Err(PlanError::CountMismatch {
                deleted: 1,
                added: 0
            })
        );
    }

    #[test]
    fn test_migration_rejects_mixed_roles() {
        let old = "kind: curvebs\netcd_services:\n  deploy:\n    - host: e1\nmds_services:\n  deploy:\n    - host: m1\n";
        let new = "kind: curvebs\netcd_services:\n  deploy:\n    - host: e2\nmds_services:\n  deploy:\n    - host: m2\n";
        assert!(matches!(
            plan_migration(&diff_topology(old, new).unwrap()),
            Err(PlanError::MixedRoles { .. })
        ));
    }

    #[test]
    fn test_migration_rejects_partial_slot() {
        let old = chunkservers(&[("h1", 2)]);
        let new = chunkservers(&[("h1", 1), ("h9", 1)]);
        // shrinking h1 changes its remaining replica
        assert!(matches!(
            plan_migration(&diff_topology(&old, &new).unwrap()),
            Err(PlanError::ChangedServices(_)) | Err(PlanError::PartialSlot { .. })
        ));
    }

    #[test]
    fn test_migration_no_changes() {
        let text = chunkservers(&[("h1", 1)]);
        assert_eq!(
            plan_migration(&diff_topology(&text, &text).unwrap()),
            Err(PlanError::NoChanges)
        );
    }

    #[test]
    fn test_scale_out_tolerates_cluster_variable_changes() {
        let text = |etcds: &[&str]| {
            let mut text = String::from("kind: curvebs\netcd_services:\n  deploy:\n");
            for host in etcds {
                text.push_str(&format!("    - host: {}\n", host));
            }
            text.push_str("mds_services:\n  config:\n    mds.etcd_endpoint: ${cluster_etcd_addr}\n  deploy:\n    - host: m1\n");
            text
        };
        let diffs = diff_topology(&text(&["e1"]), &text(&["e1", "e2"])).unwrap();
        assert!(diffs.iter().any(|d| d.diff_type == DiffType::Change));

        let added = plan_scale_out(&diffs).unwrap();
        let ids: Vec<_> = added.iter().map(|dc| dc.id()).collect();
        assert_eq!(ids, vec!["etcd_e2_1_0"]);
    }

    #[test]
    fn test_scale_out_rejects_definition_change() {
        let old = chunkservers(&[("h1", 1)]);
        let new = format!("{}    - host: h2\n      config:\n        copysets: 7\n", chunkservers(&[("h1", 2)]));
        assert!(matches!(
            plan_scale_out(&diff_topology(&old, &new).unwrap()),
            Err(PlanError::ChangedServices(_))
        ));
    }

    #[test]
    fn test_scale_out() {
        let old = chunkservers(&[("h1", 1)]);
        let new = chunkservers(&[("h1", 1), ("h2", 3)]);
        let added = plan_scale_out(&diff_topology(&old, &new).unwrap()).unwrap();
        assert_eq!(added.len(), 3);
        assert!(added.iter().all(|dc| dc.host() == "h2"));

        assert!(matches!(
            plan_scale_out(&diff_topology(&new, &old).unwrap()),
            Err(PlanError::DeletedServices(_))
        ));
    }
}
