//! Change commands - migrate and scale out
//!
//! Both diff the current topology against the target one, check the diff
//! is a valid change of that kind and run the matching recipe.

use super::CommandContext;
use crate::error::{read_to_string, Result};
use crate::playbook::recipes;
use crate::topology::{diff_topology, plan_migration, plan_scale_out, Topology};
use clap::Parser;
use std::path::PathBuf;

/// Arguments for migrate and scale-out
#[derive(Parser, Debug, Clone)]
pub struct ChangeArgs {
    /// Topology the cluster currently runs
    #[arg(long)]
    pub from: PathBuf,

    /// Topology after the change
    #[arg(long)]
    pub to: PathBuf,

    /// Path to the hosts file
    #[arg(short = 'H', long)]
    pub hosts: PathBuf,
}

impl ChangeArgs {
    fn read(&self) -> Result<(String, String)> {
        Ok((read_to_string(&self.from)?, read_to_string(&self.to)?))
    }

    /// Move services to the hosts of the target topology
    pub async fn migrate(&self, ctx: &mut CommandContext) -> Result<i32> {
        let (old_text, new_text) = self.read()?;
        let migrates = plan_migration(&diff_topology(&old_text, &new_text)?)?;
        let old = Topology::parse(&old_text)?;
        let targets: Vec<_> = migrates.iter().map(|m| m.to.clone()).collect();
        let hosts = ctx.load_hosts(&self.hosts, &[old.deploy_configs(), targets.as_slice()].concat())?;

        ctx.output.banner("MIGRATE SERVICES");
        for m in &migrates {
            ctx.output
                .info(&format!("{} -> {}", m.from.id(), m.to.id()));
        }
        let outcome = ctx
            .playbook(hosts, recipes::migrate(&old, &migrates))
            .execute()
            .await;
        let code = ctx.finish(outcome)?;
        ctx.output
            .success(&format!("Migrated {} services", migrates.len()));
        Ok(code)
    }

    /// Add the services new in the target topology
    pub async fn scale_out(&self, ctx: &mut CommandContext) -> Result<i32> {
        let (old_text, new_text) = self.read()?;
        let added = plan_scale_out(&diff_topology(&old_text, &new_text)?)?;
        let new = Topology::parse(&new_text)?;
        let hosts = ctx.load_hosts(&self.hosts, new.deploy_configs())?;

        ctx.output.banner("SCALE OUT");
        let outcome = ctx
            .playbook(hosts, recipes::scale_out(&new, &added))
            .execute()
            .await;
        let code = ctx.finish(outcome)?;
        ctx.output
            .success(&format!("Added {} services", added.len()));
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_args_parsing() {
        let args = ChangeArgs::try_parse_from([
            "migrate", "--from", "a.yaml", "--to", "b.yaml", "-H", "hosts.yaml",
        ])
        .unwrap();
        assert_eq!(args.from, PathBuf::from("a.yaml"));
        assert_eq!(args.to, PathBuf::from("b.yaml"));
    }
}
