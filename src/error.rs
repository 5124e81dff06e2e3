//! Error types for storadm.
//!
//! Every subsystem owns its error enum; [`Error`] wraps them so callers
//! can propagate any of them with `?` and map them to an exit status.

use std::path::PathBuf;
use thiserror::Error;

use crate::configure::ItemError;
use crate::connection::ConnectionError;
use crate::executor::ExecutorError;
use crate::inventory::HostsError;
use crate::playbook::PlaybookError;
use crate::topology::{PlanError, TopologyError};
use crate::vars::VarsError;

/// Result type alias for storadm operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for storadm.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Vars(#[from] VarsError),

    #[error(transparent)]
    Item(#[from] ItemError),

    /// Topology text could not be turned into deploy configs.
    #[error("Invalid topology: {0}")]
    Topology(#[from] TopologyError),

    /// Host inventory could not be parsed.
    #[error("Invalid hosts: {0}")]
    Hosts(#[from] HostsError),

    /// A topology change is not a valid migration or scale-out.
    #[error("Cannot plan change: {0}")]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Playbook(#[from] PlaybookError),

    /// Reading an input file failed.
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Executor(_) | Error::Playbook(PlaybookError::Group { .. }) => 2,
            Error::Connection(_) | Error::Playbook(PlaybookError::Connect { .. }) => 3,
            Error::Topology(_) | Error::Vars(_) | Error::Item(_) => 4,
            Error::Hosts(_) => 5,
            Error::Plan(_) => 6,
            _ => 1,
        }
    }
}

/// Read a text input, attaching the path to any error.
pub fn read_to_string(path: impl Into<PathBuf>) -> Result<String> {
    let path = path.into();
    std::fs::read_to_string(&path).map_err(|e| Error::io(path, e))
}
