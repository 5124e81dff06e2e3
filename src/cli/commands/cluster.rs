//! Cluster commands - deploy, status and precheck
//!
//! Each runs one recipe over every service of a topology.

use super::CommandContext;
use crate::cli::output::status_string;
use crate::error::Result;
use crate::executor::TaskStatus;
use crate::playbook::recipes;
use crate::playbook::steps::{status_key, STATUS_NOT_EXIST};
use crate::playbook::StepType;
use clap::Parser;
use std::path::PathBuf;

/// Arguments shared by the cluster commands
#[derive(Parser, Debug, Clone)]
pub struct ClusterArgs {
    /// Path to the topology file
    #[arg(short = 't', long)]
    pub topology: PathBuf,

    /// Path to the hosts file
    #[arg(short = 'H', long)]
    pub hosts: PathBuf,
}

impl ClusterArgs {
    /// Deploy every service of the topology
    pub async fn deploy(&self, ctx: &mut CommandContext) -> Result<i32> {
        let topology = ctx.load_topology(&self.topology)?;
        let hosts = ctx.load_hosts(&self.hosts, topology.deploy_configs())?;

        ctx.output.banner("DEPLOY CLUSTER");
        let outcome = ctx
            .playbook(hosts, recipes::deploy(&topology))
            .execute()
            .await;
        let code = ctx.finish(outcome)?;
        ctx.output.success("Cluster deployed");
        Ok(code)
    }

    /// Show the container status of every service
    pub async fn status(&self, ctx: &mut CommandContext) -> Result<i32> {
        let topology = ctx.load_topology(&self.topology)?;
        let hosts = ctx.load_hosts(&self.hosts, topology.deploy_configs())?;

        let outcome = ctx
            .playbook(hosts, recipes::status(topology.deploy_configs()))
            .execute()
            .await;

        let use_color = ctx.output.use_color();
        let task_status = |slot: usize| {
            outcome
                .report
                .group(StepType::GetServiceStatus)
                .and_then(|g| g.batch.tasks.get(slot))
                .map_or(TaskStatus::Skip, |t| t.status)
        };
        let rows: Vec<Vec<String>> = topology
            .deploy_configs()
            .iter()
            .enumerate()
            .map(|(slot, dc)| {
                let status = outcome
                    .report
                    .outputs
                    .get(&status_key(dc.id()))
                    .cloned()
                    .unwrap_or_else(|| STATUS_NOT_EXIST.to_string());
                vec![
                    dc.id().to_string(),
                    dc.role().to_string(),
                    dc.host().to_string(),
                    dc.container_name(),
                    status,
                    status_string(task_status(slot), use_color),
                ]
            })
            .collect();
        ctx.output
            .table(&["ID", "ROLE", "HOST", "CONTAINER", "STATUS", "RESULT"], &rows);

        match outcome.error {
            Some(e) => Err(e.into()),
            None => Ok(0),
        }
    }

    /// Check that every host can run the cluster
    pub async fn precheck(&self, ctx: &mut CommandContext) -> Result<i32> {
        let topology = ctx.load_topology(&self.topology)?;
        let hosts = ctx.load_hosts(&self.hosts, topology.deploy_configs())?;

        ctx.output.banner("PRECHECK");
        let outcome = ctx
            .playbook(hosts, recipes::precheck(topology.deploy_configs()))
            .execute()
            .await;
        let code = ctx.finish(outcome)?;
        ctx.output.success("All hosts passed");
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_args_parsing() {
        let args =
            ClusterArgs::try_parse_from(["deploy", "-t", "topo.yaml", "--hosts", "hosts.yaml"])
                .unwrap();
        assert_eq!(args.topology, PathBuf::from("topo.yaml"));
        assert_eq!(args.hosts, PathBuf::from("hosts.yaml"));
    }
}
