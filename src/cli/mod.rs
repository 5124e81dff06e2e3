//! CLI module for storadm
//!
//! This module provides the command-line interface for storadm,
//! including argument parsing and subcommand handling.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// storadm - deploy and operate storage clusters from a topology file
#[derive(Parser, Debug, Clone)]
#[command(name = "storadm")]
#[command(version)]
#[command(about = "Deploy and operate storage clusters from a topology file", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "STORADM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Tasks run at once within one step group
    #[arg(short = 'j', long, global = true)]
    pub concurrency: Option<usize>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Validate a topology and list its services
    Check(commands::check::CheckArgs),

    /// Show how two topologies differ
    Diff(commands::diff::DiffArgs),

    /// Deploy every service of a topology
    Deploy(commands::cluster::ClusterArgs),

    /// Show the container status of every service
    Status(commands::cluster::ClusterArgs),

    /// Check that the hosts can run the cluster
    Precheck(commands::cluster::ClusterArgs),

    /// Move services to other hosts
    Migrate(commands::change::ChangeArgs),

    /// Add services to a running cluster
    #[command(name = "scale-out")]
    ScaleOut(commands::change::ChangeArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }
}
