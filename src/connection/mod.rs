//! Connection layer for remote host communication.
//!
//! Steps talk to hosts only through the [`Connection`] trait: run a command
//! on the host, run a command on the control node, or write content to a
//! file on the host. Transport details (ssh client, key, retries, timeout)
//! are configured once on the [`ConnectionFactory`] that hands connections
//! out.
//!
//! # Supported Transports
//!
//! - **SSH**: the system `ssh` client, see [`SshConnection`]
//! - **Local**: direct execution on the control node, see [`LocalConnection`]

/// Local execution connection implementation.
pub mod local;

/// SSH connection implementation using the system client.
pub mod ssh;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub use local::LocalConnection;
pub use ssh::{SshConnection, SshConnectionFactory};

/// Errors that can occur during connection operations.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Failed to establish initial connection to the host.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Command could not be run (not to be confused with non-zero exit code).
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// Writing content to the host failed.
    #[error("File transfer failed: {0}")]
    TransferFailed(String),

    /// Operation timed out.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// The host is not in the inventory.
    #[error("Host not found: {0}")]
    HostNotFound(String),

    /// I/O error during connection operations.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// The result of executing a command on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code of the command (0 typically indicates success).
    pub exit_code: i32,
    /// Content written to standard output.
    pub stdout: String,
    /// Content written to standard error.
    pub stderr: String,
    /// `true` if `exit_code == 0`.
    pub success: bool,
}

impl CommandResult {
    /// Create a new successful command result
    pub fn success(stdout: String, stderr: String) -> Self {
        Self {
            exit_code: 0,
            stdout,
            stderr,
            success: true,
        }
    }

    /// Create a new failed command result
    pub fn failure(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            success: false,
        }
    }

    /// Get the combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Options for command execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Environment variables exported before the command
    pub env: Vec<(String, String)>,
    /// Timeout in seconds (None for no timeout)
    pub timeout: Option<u64>,
    /// Run the command as this user through sudo
    pub become_user: Option<String>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_become_user(mut self, user: impl Into<String>) -> Self {
        self.become_user = Some(user.into());
        self
    }
}

/// Options for file transfer
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// File mode (permissions) to set
    pub mode: Option<u32>,
    /// Create parent directories if they don't exist
    pub create_dirs: bool,
}

impl TransferOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_create_dirs(mut self) -> Self {
        self.create_dirs = true;
        self
    }
}

/// Capability a step uses to reach its host
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the connection identifier (host name)
    fn identifier(&self) -> &str;

    /// Execute a command on the host
    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult>;

    /// Execute a command on the control node
    async fn execute_local(&self, command: &str) -> ConnectionResult<CommandResult> {
        local::run_shell(command, &ExecuteOptions::default()).await
    }

    /// Write content to a file on the host
    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()>;
}

/// Hands out one connection per host
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, host: &str) -> ConnectionResult<Arc<dyn Connection>>;
}

/// Factory running every host's commands on the control node.
///
/// Connections are cached per host name so identifiers stay stable.
#[derive(Default)]
pub struct LocalConnectionFactory {
    cache: Mutex<HashMap<String, Arc<dyn Connection>>>,
}

impl LocalConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionFactory for LocalConnectionFactory {
    async fn connect(&self, host: &str) -> ConnectionResult<Arc<dyn Connection>> {
        let mut cache = self.cache.lock();
        let conn = cache
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(LocalConnection::with_identifier(host)));
        Ok(Arc::clone(conn))
    }
}

/// Wrap `command` so it runs with `options` applied, for transports that
/// take a single shell string.
pub(crate) fn wrap_command(command: &str, options: &ExecuteOptions) -> String {
    let mut wrapped = String::new();
    for (key, value) in &options.env {
        wrapped.push_str(&format!("export {}={}; ", key, shell_words::quote(value)));
    }
    match &options.become_user {
        Some(user) => wrapped.push_str(&format!(
            "sudo -E -u {} sh -c {}",
            shell_words::quote(user),
            shell_words::quote(command)
        )),
        None => wrapped.push_str(command),
    }
    wrapped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_result_output() {
        let ok = CommandResult::success("out".into(), String::new());
        assert!(ok.success);
        assert_eq!(ok.combined_output(), "out");

        let failed = CommandResult::failure(2, "out".into(), "err".into());
        assert!(!failed.success);
        assert_eq!(failed.combined_output(), "out\nerr");
    }

    #[test]
    fn test_wrap_command() {
        let options = ExecuteOptions::new()
            .with_env("LANG", "en US")
            .with_become_user("curve");
        assert_eq!(
            wrap_command("echo hi", &options),
            "export LANG='en US'; sudo -E -u curve sh -c 'echo hi'"
        );
        assert_eq!(wrap_command("ls", &ExecuteOptions::new()), "ls");
    }

    #[tokio::test]
    async fn test_local_factory_caches() {
        let factory = LocalConnectionFactory::new();
        let a = factory.connect("h1").await.unwrap();
        let b = factory.connect("h1").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.identifier(), "h1");
    }
}
