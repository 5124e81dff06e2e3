//! CLI tests for storadm
//!
//! Only commands that never reach a host run here: check, diff and the
//! validation that happens before a playbook starts.

mod common;

use assert_cmd::Command;
use predicates::prelude::*;

use common::*;

fn storadm_cmd() -> Command {
    let mut cmd = Command::cargo_bin("storadm").unwrap();
    cmd.arg("--no-color")
        .env_remove("RUST_LOG")
        .env_remove("STORADM_CONFIG");
    cmd
}

#[test]
fn test_help_lists_commands() {
    storadm_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("scale-out"))
        .stdout(predicate::str::contains("precheck"));
}

#[test]
fn test_version() {
    storadm_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_check_lists_services() {
    let topology = write_temp_file(CURVEBS_TOPOLOGY);
    storadm_cmd()
        .args(["check", "-t"])
        .arg(topology.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("CURVEBS TOPOLOGY"))
        .stdout(predicate::str::contains("chunkserver_10.0.0.3_2_0"))
        .stdout(predicate::str::contains("Topology is valid: 10 services"));
}

#[test]
fn test_check_invalid_topology_exit_code() {
    let topology = write_temp_file("kind: ceph\n");
    storadm_cmd()
        .args(["check", "-t"])
        .arg(topology.path())
        .assert()
        .code(4)
        .stderr(predicate::str::contains("unsupported kind 'ceph'"));
}

#[test]
fn test_check_missing_file() {
    storadm_cmd()
        .args(["check", "-t", "/nonexistent/topology.yaml"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("/nonexistent/topology.yaml"));
}

#[test]
fn test_check_requires_topology() {
    storadm_cmd().arg("check").assert().failure();
}

#[test]
fn test_diff_counts_changes() {
    let old = write_temp_file(&chunkserver_topology(&["h1", "h2", "h3"]));
    let new = write_temp_file(&chunkserver_topology(&["h1", "h4", "h3"]));
    storadm_cmd()
        .arg("diff")
        .arg(old.path())
        .arg(new.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("chunkserver_h4_1_0"))
        .stdout(predicate::str::contains(
            "1 added, 1 deleted, 0 changed, 2 unchanged",
        ));
}

#[test]
fn test_diff_identical() {
    let text = chunkserver_topology(&["h1"]);
    let old = write_temp_file(&text);
    let new = write_temp_file(&text);
    storadm_cmd()
        .arg("diff")
        .arg(old.path())
        .arg(new.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("No changes"));
}

#[test]
fn test_deploy_rejects_host_missing_from_inventory() {
    let topology = write_temp_file(&chunkserver_topology(&["10.0.0.1", "10.0.0.9"]));
    let hosts = write_temp_file(HOSTS);
    storadm_cmd()
        .arg("deploy")
        .arg("-t")
        .arg(topology.path())
        .arg("-H")
        .arg(hosts.path())
        .assert()
        .code(5)
        .stderr(predicate::str::contains("10.0.0.9"));
}

#[test]
fn test_migrate_without_changes() {
    let topology = write_temp_file(&chunkserver_topology(&["10.0.0.1"]));
    let hosts = write_temp_file(HOSTS);
    storadm_cmd()
        .arg("migrate")
        .arg("--from")
        .arg(topology.path())
        .arg("--to")
        .arg(topology.path())
        .arg("-H")
        .arg(hosts.path())
        .assert()
        .code(6);
}

#[test]
fn test_scale_out_rejects_removal() {
    let old = write_temp_file(&chunkserver_topology(&["10.0.0.1", "10.0.0.2"]));
    let new = write_temp_file(&chunkserver_topology(&["10.0.0.1"]));
    let hosts = write_temp_file(HOSTS);
    storadm_cmd()
        .arg("scale-out")
        .arg("--from")
        .arg(old.path())
        .arg("--to")
        .arg(new.path())
        .arg("-H")
        .arg(hosts.path())
        .assert()
        .code(6);
}
