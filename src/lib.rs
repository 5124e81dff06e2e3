//! # storadm - A Deployment Orchestrator for Storage Clusters
//!
//! storadm turns a declarative topology of a distributed storage cluster
//! into ordered, host-targeted operations (pull image, sync config, start
//! services, create pools, migrate, scale out) executed over SSH with
//! bounded parallelism, and aggregates per-host outcomes into cluster-level
//! results.
//!
//! ## Core Concepts
//!
//! - **Topology**: The cluster description, parsed into one [`DeployConfig`](topology::DeployConfig) per service instance
//! - **Variables**: `${name}` placeholders resolved per instance
//! - **Diff**: Classification of instances as added, deleted or changed between two topologies
//! - **Tasks**: Ordered steps bound to one host
//! - **Executor**: Runs a batch of tasks with a concurrency bound and records each outcome
//! - **Playbooks**: Ordered step groups, each expanded into one task batch
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           CLI Interface                              │
//! │                    (clap-based command parsing)                      │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!          ┌─────────────────────────┼─────────────────────────┐
//!          ▼                         ▼                         ▼
//! ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │    Topology     │   │   Topology Differ   │   │   Host Inventory    │
//! │ (layers + vars) │   │ (add/delete/change) │   │   (ssh targets)     │
//! └─────────────────┘   └─────────────────────┘   └─────────────────────┘
//!          │                         │                         │
//!          └─────────────────────────┼─────────────────────────┘
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Playbook (step groups)                          │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │          Task Executor (semaphore, monitor, callbacks)               │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                 Connections (ssh, local) to hosts                    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use storadm::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let topology = Topology::parse(&std::fs::read_to_string("topology.yaml")?)?;
//!     let hosts = Hosts::parse(&std::fs::read_to_string("hosts.yaml")?)?;
//!     let factory = Arc::new(SshConnectionFactory::new(hosts, SshConfig::default()));
//!
//!     let report = Playbook::new(factory)
//!         .with_concurrency(5)
//!         .with_recipe(recipes::deploy(&topology))
//!         .run()
//!         .await?;
//!     println!("{} groups ran", report.groups.len());
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    // Connection types
    pub use crate::connection::{
        CommandResult, Connection, ConnectionError, ConnectionFactory, ConnectionResult,
        ExecuteOptions, LocalConnection, LocalConnectionFactory, SshConnection,
        SshConnectionFactory, TransferOptions,
    };

    // Configuration
    pub use crate::config::{Config, SshConfig};

    // Error handling
    pub use crate::error::{Error, Result};

    // Execution engine
    pub use crate::executor::{
        BatchReport, ExecOptions, Outputs, Step, StepContext, StepError, Task, TaskExecutor,
        TaskStatus, Tasks,
    };

    // Inventory
    pub use crate::inventory::{HostConfig, Hosts};

    // Playbooks
    pub use crate::playbook::{
        recipes, ConfigSelector, Playbook, PlaybookReport, StepGroup, StepType,
    };

    // Topology
    pub use crate::topology::{
        diff_topology, parse_topology, plan_migration, plan_scale_out, DeployConfig, DiffType,
        Kind, Topology, TopologyDiff,
    };

    // Variables
    pub use crate::vars::Variables;

    // Callbacks
    pub use crate::callback::{ExecutionCallback, LogCallback, NullCallback, ProgressCallback};
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases for storadm operations.
pub mod error;

/// Tagged configuration values.
///
/// Raw YAML scalars and sequences are converted once into a
/// [`Value`](value::Value) that later consumers match on.
pub mod value;

/// Variable registration and `${name}` resolution.
///
/// Resolution is recursive on demand with cycle detection, so the result
/// does not depend on registration order.
pub mod vars;

/// Typed configuration item schema and the built-in item catalogs.
pub mod configure;

// ============================================================================
// Cluster Model
// ============================================================================

/// Topology parsing, diffing, and migration planning.
///
/// A topology is parsed through three config layers (global, service,
/// deploy entry) into a flat list of deploy configs with stable ids. Two
/// topologies can be diffed into added, deleted, and changed instances,
/// and the diff checked as a migration or scale-out.
pub mod topology;

/// Host inventory: ssh targets referenced by topology `host` fields.
pub mod inventory;

// ============================================================================
// Infrastructure
// ============================================================================

/// Connection layer for remote host communication.
///
/// This module provides the [`Connection`](connection::Connection) trait and implementations:
/// - **SSH**: The system `ssh` client, with retries on transport failures
/// - **Local**: Direct execution on the control node
pub mod connection;

/// Built-in steps: commands, file installs, closures, and docker command lines.
pub mod modules;

// ============================================================================
// Execution Engine
// ============================================================================

/// Task executor with bounded parallelism.
///
/// Runs a batch of independent tasks, records each outcome in a shared
/// monitor, aggregates tasks sharing a parent id, and stops launching new
/// tasks after a failure unless told to keep going.
pub mod executor;

/// Playbooks: step groups run strictly one after another, plus post steps.
pub mod playbook;

// ============================================================================
// Configuration
// ============================================================================

/// Tool configuration: defaults, ssh settings, and logging.
///
/// Loaded from a config file and overridden by environment variables.
pub mod config;

// ============================================================================
// Callbacks and CLI
// ============================================================================

/// Execution event subscribers: logging and progress bars.
pub mod callback;

/// Command-line interface.
pub mod cli;

// ============================================================================
// Version Information
// ============================================================================

/// Returns the current version of storadm.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
