//! Subcommands module for storadm CLI
//!
//! This module contains all the subcommand implementations.

pub mod change;
pub mod check;
pub mod cluster;
pub mod diff;

use std::path::Path;
use std::sync::Arc;

use crate::callback::{ExecutionCallback, LogCallback, ProgressCallback};
use crate::cli::output::{status_string, OutputFormatter};
use crate::config::Config;
use crate::connection::SshConnectionFactory;
use crate::error::{read_to_string, Result};
use crate::executor::TaskStatus;
use crate::inventory::{Hosts, HostsError};
use crate::playbook::{Playbook, PlaybookOutcome, Recipe};
use crate::topology::{DeployConfig, Topology};

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration
    pub config: Config,
    /// Output formatter
    pub output: OutputFormatter,
    /// Verbosity level
    pub verbosity: u8,
    /// Tasks run at once within one step group
    pub concurrency: usize,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &crate::cli::Cli, config: Config) -> Self {
        let output = OutputFormatter::new(!cli.no_color, cli.verbosity());
        let concurrency = cli.concurrency.unwrap_or(config.defaults.concurrency);

        Self {
            config,
            output,
            verbosity: cli.verbosity(),
            concurrency,
        }
    }

    pub fn load_topology(&self, path: &Path) -> Result<Topology> {
        let text = read_to_string(path)?;
        let topology = Topology::parse(&text)?;
        self.output.info(&format!(
            "Parsed {} services from {}",
            topology.len(),
            path.display()
        ));
        Ok(topology)
    }

    /// Load the host inventory and check it covers every host of `configs`.
    pub fn load_hosts(&self, path: &Path, configs: &[DeployConfig]) -> Result<Hosts> {
        let hosts = Hosts::parse(&read_to_string(path)?)?;
        if let Some(dc) = configs.iter().find(|dc| !hosts.contains(dc.host())) {
            return Err(HostsError::NotFound(dc.host().to_string()).into());
        }
        Ok(hosts)
    }

    /// Build a playbook running `recipe` over ssh.
    pub fn playbook(&self, hosts: Hosts, recipe: Recipe) -> Playbook {
        let factory = Arc::new(SshConnectionFactory::new(hosts, self.config.ssh.clone()));
        // log lines and progress bars would interleave
        let callback: Arc<dyn ExecutionCallback> = if self.verbosity > 0 {
            Arc::new(LogCallback)
        } else {
            Arc::new(ProgressCallback::new())
        };
        Playbook::new(factory)
            .with_callback(callback)
            .with_concurrency(self.concurrency)
            .with_recipe(recipe)
    }

    /// Print the per-group summary of a finished playbook and return its
    /// exit code.
    pub fn finish(&self, outcome: PlaybookOutcome) -> Result<i32> {
        let use_color = self.output.use_color();
        let rows: Vec<Vec<String>> = outcome
            .report
            .groups
            .iter()
            .map(|group| {
                let status = if group.batch.success() {
                    TaskStatus::Ok
                } else {
                    TaskStatus::Error
                };
                vec![
                    group.step_type.to_string(),
                    group.batch.count(TaskStatus::Ok).to_string(),
                    group.batch.count(TaskStatus::Skip).to_string(),
                    group.batch.count(TaskStatus::Error).to_string(),
                    status_string(status, use_color),
                ]
            })
            .collect();
        self.output.section("Summary");
        self.output
            .table(&["STEP", "OK", "SKIP", "ERROR", "STATUS"], &rows);
        self.output.flush();

        match outcome.error {
            Some(e) => Err(e.into()),
            None => Ok(0),
        }
    }
}
