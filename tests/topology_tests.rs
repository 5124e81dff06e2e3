//! Integration tests for topology parsing, diffing and change planning

mod common;

use std::collections::HashSet;

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use common::*;
use storadm::topology::diff::diff_deploy_configs;
use storadm::topology::{
    diff_topology, plan_migration, plan_scale_out, DiffType, Kind, PlanError, Topology,
    TopologyError,
};

// ============================================================================
// Parsing
// ============================================================================

#[test]
fn test_replicas_expand_into_instances() {
    let text = r#"
kind: curvebs
global:
  container_image: X
chunkserver_services:
  deploy:
    - host: h1
      replica: 2
"#;
    let topology = Topology::parse(text).unwrap();
    let ids: Vec<_> = topology.deploy_configs().iter().map(|dc| dc.id()).collect();
    assert_eq!(ids, vec!["chunkserver_h1_0_0", "chunkserver_h1_0_1"]);
    for dc in topology.deploy_configs() {
        assert_eq!(dc.container_image(), "X");
        assert_eq!(dc.replicas(), 2);
        assert_eq!(dc.parent_id(), "chunkserver_h1_0_0");
    }
}

#[test]
fn test_fixture_topologies_parse() {
    let bs = Topology::parse(CURVEBS_TOPOLOGY).unwrap();
    assert_eq!(bs.kind(), Kind::CurveBs);
    assert_eq!(bs.len(), 10);
    assert_eq!(bs.filter_role("chunkserver").count(), 3);

    let mds = bs.get("mds_10.0.0.2_1_0").unwrap();
    assert_eq!(mds.data_dir(), "/data/mds1");
    assert_eq!(mds.log_dir(), "/logs/mds1");
    assert_eq!(mds.container_image(), "example/curvebs:v1.2");

    let fs = Topology::parse(CURVEFS_TOPOLOGY).unwrap();
    assert_eq!(fs.kind(), Kind::CurveFs);
    assert_eq!(fs.filter_role("metaserver").count(), 2);
}

#[test]
fn test_roles_follow_kind_order() {
    let topology = Topology::parse(CURVEBS_TOPOLOGY).unwrap();
    let mut roles: Vec<&str> = topology.deploy_configs().iter().map(|dc| dc.role()).collect();
    roles.dedup();
    assert_eq!(roles, vec!["etcd", "mds", "chunkserver", "snapshotclone"]);
}

#[test]
fn test_parse_is_deterministic() {
    let first = Topology::parse(CURVEBS_TOPOLOGY).unwrap();
    let second = Topology::parse(CURVEBS_TOPOLOGY).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_random_uuid_does_not_break_equality() {
    let text = r#"
kind: curvebs
etcd_services:
  config:
    etcd.initial_cluster_token: ${random_uuid}
  deploy:
    - host: 10.0.0.1
"#;
    let first = Topology::parse(text).unwrap();
    let second = Topology::parse(text).unwrap();

    let token = |t: &Topology| t.deploy_configs()[0].get("etcd.initial_cluster_token").cloned();
    assert_ne!(token(&first), token(&second));
    assert_eq!(first, second);
    assert_eq!(
        first.deploy_configs()[0].content_hash(),
        second.deploy_configs()[0].content_hash()
    );
}

#[test]
fn test_unsupported_kind_rejected() {
    let err = Topology::parse("kind: ceph\n").unwrap_err();
    assert!(matches!(err, TopologyError::UnsupportedKind(ref k) if k == "ceph"));
    assert_eq!(err.to_string(), "unsupported kind 'ceph'");
}

// ============================================================================
// Diff and planning
// ============================================================================

#[test]
fn test_replacing_a_host_plans_one_migration() {
    let old = chunkserver_topology(&["h1", "h2", "h3"]);
    let new = chunkserver_topology(&["h1", "h4", "h3"]);

    let diffs = diff_topology(&old, &new).unwrap();
    let kinds: Vec<_> = diffs
        .iter()
        .map(|d| (d.diff_type, d.deploy_config.id().to_string()))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (DiffType::Delete, "chunkserver_h2_1_0".to_string()),
            (DiffType::Add, "chunkserver_h4_1_0".to_string()),
        ]
    );

    let migrates = plan_migration(&diffs).unwrap();
    assert_eq!(migrates.len(), 1);
    assert_eq!(migrates[0].from.host(), "h2");
    assert_eq!(migrates[0].to.host(), "h4");
}

#[test]
fn test_identical_topologies_have_nothing_to_plan() {
    let text = chunkserver_topology(&["h1", "h2"]);
    let diffs = diff_topology(&text, &text).unwrap();
    assert!(diffs.is_empty());
    assert!(matches!(plan_migration(&diffs), Err(PlanError::NoChanges)));
    assert!(matches!(plan_scale_out(&diffs), Err(PlanError::NoChanges)));
}

#[test]
fn test_scale_out_returns_added_instances() {
    let old = chunkserver_topology(&["h1"]);
    let new = chunkserver_topology(&["h1", "h2", "h3"]);
    let added = plan_scale_out(&diff_topology(&old, &new).unwrap()).unwrap();
    let hosts: Vec<_> = added.iter().map(|dc| dc.host()).collect();
    assert_eq!(hosts, vec!["h2", "h3"]);
}

#[test]
fn test_scale_out_rejects_deletions() {
    let old = chunkserver_topology(&["h1", "h2"]);
    let new = chunkserver_topology(&["h1"]);
    assert!(plan_scale_out(&diff_topology(&old, &new).unwrap()).is_err());
}

// ============================================================================
// Properties
// ============================================================================

fn host_list() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(0u8..8, 0..6).prop_map(|ids| {
        let mut seen = HashSet::new();
        ids.into_iter()
            .filter(|id| seen.insert(*id))
            .map(|id| format!("h{}", id))
            .collect()
    })
}

fn refs(hosts: &[String]) -> Vec<&str> {
    hosts.iter().map(String::as_str).collect()
}

proptest! {
    #[test]
    fn prop_ids_stable_across_parses(hosts in host_list()) {
        let text = chunkserver_topology(&refs(&hosts));
        let a = Topology::parse(&text).unwrap().into_deploy_configs();
        let b = Topology::parse(&text).unwrap().into_deploy_configs();
        let ids_a: Vec<_> = a.iter().map(|dc| dc.id().to_string()).collect();
        let ids_b: Vec<_> = b.iter().map(|dc| dc.id().to_string()).collect();
        prop_assert_eq!(ids_a, ids_b);
        for (x, y) in a.iter().zip(b.iter()) {
            prop_assert_eq!(x.content_hash(), y.content_hash());
        }
    }

    #[test]
    fn prop_diff_partitions_ids(old in host_list(), new in host_list()) {
        let old = Topology::parse(&chunkserver_topology(&refs(&old))).unwrap().into_deploy_configs();
        let new = Topology::parse(&chunkserver_topology(&refs(&new))).unwrap().into_deploy_configs();
        let diffs = diff_deploy_configs(&old, &new);

        let old_ids: HashSet<_> = old.iter().map(|dc| dc.id().to_string()).collect();
        let new_ids: HashSet<_> = new.iter().map(|dc| dc.id().to_string()).collect();
        let of = |t: DiffType| -> HashSet<String> {
            diffs
                .iter()
                .filter(|d| d.diff_type == t)
                .map(|d| d.deploy_config.id().to_string())
                .collect()
        };

        prop_assert_eq!(of(DiffType::Add), new_ids.difference(&old_ids).cloned().collect::<HashSet<_>>());
        prop_assert_eq!(of(DiffType::Delete), old_ids.difference(&new_ids).cloned().collect::<HashSet<_>>());
        prop_assert!(of(DiffType::Change).is_subset(&old_ids.intersection(&new_ids).cloned().collect()));
    }
}
