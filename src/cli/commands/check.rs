//! Check command - validate a topology
//!
//! Parses the topology exactly as deploy would and lists its services.

use super::CommandContext;
use crate::error::Result;
use clap::Parser;
use std::path::PathBuf;

/// Arguments for the check command
#[derive(Parser, Debug, Clone)]
pub struct CheckArgs {
    /// Path to the topology file
    #[arg(short = 't', long)]
    pub topology: PathBuf,
}

impl CheckArgs {
    /// Execute the check command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let topology = ctx.load_topology(&self.topology)?;

        ctx.output
            .banner(&format!("{} TOPOLOGY", topology.kind().as_str().to_uppercase()));
        let rows: Vec<Vec<String>> = topology
            .deploy_configs()
            .iter()
            .map(|dc| {
                vec![
                    dc.id().to_string(),
                    dc.role().to_string(),
                    dc.host().to_string(),
                    format!("{}/{}", dc.replica_sequence(), dc.replicas()),
                    format!("{}:{}", dc.listen_ip(), dc.listen_port()),
                ]
            })
            .collect();
        ctx.output
            .table(&["ID", "ROLE", "HOST", "REPLICA", "LISTEN"], &rows);
        ctx.output
            .success(&format!("\nTopology is valid: {} services", topology.len()));
        Ok(0)
    }
}
