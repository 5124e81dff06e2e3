//! Shared test utilities and fixtures for the storadm test suite.
//!
//! This module provides:
//! - A mock [`Connection`] recording every command and upload
//! - A mock [`ConnectionFactory`] handing those out per host
//! - Topology and hosts fixtures
//! - Temporary file helpers
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tempfile::NamedTempFile;

use storadm::connection::{
    CommandResult, Connection, ConnectionError, ConnectionFactory, ConnectionResult,
    ExecuteOptions, TransferOptions,
};

// ============================================================================
// Mock Connection Implementation
// ============================================================================

/// Everything the mock connections of one factory saw, in order.
#[derive(Debug, Default)]
pub struct Journal {
    entries: RwLock<Vec<(String, String)>>,
}

impl Journal {
    fn push(&self, host: &str, entry: String) {
        self.entries.write().push((host.to_string(), entry));
    }

    /// All entries as `host: entry`
    pub fn lines(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|(host, entry)| format!("{}: {}", host, entry))
            .collect()
    }

    /// Entries recorded for `host`
    pub fn for_host(&self, host: &str) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    /// Index of the first entry containing `pattern`
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.entries
            .read()
            .iter()
            .position(|(_, entry)| entry.contains(pattern))
    }

    /// Index of the last entry containing `pattern`
    pub fn rposition(&self, pattern: &str) -> Option<usize> {
        self.entries
            .read()
            .iter()
            .rposition(|(_, entry)| entry.contains(pattern))
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.contains(pattern))
            .count()
    }
}

/// A mock connection for testing purposes.
///
/// Commands succeed with `stdout` unless they contain one of the failure
/// patterns, in which case they exit 1.
#[derive(Debug)]
pub struct MockConnection {
    host: String,
    stdout: String,
    fail_on: Vec<String>,
    journal: Arc<Journal>,
}

impl MockConnection {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            stdout: String::new(),
            fail_on: Vec::new(),
            journal: Arc::new(Journal::default()),
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn failing_on(mut self, pattern: impl Into<String>) -> Self {
        self.fail_on.push(pattern.into());
        self
    }

    pub fn journal(&self) -> Arc<Journal> {
        Arc::clone(&self.journal)
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn identifier(&self) -> &str {
        &self.host
    }

    async fn execute(
        &self,
        command: &str,
        _options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        self.journal.push(&self.host, command.to_string());
        if self.fail_on.iter().any(|p| command.contains(p.as_str())) {
            return Ok(CommandResult::failure(1, String::new(), "mock failure".into()));
        }
        Ok(CommandResult::success(self.stdout.clone(), String::new()))
    }

    async fn execute_local(&self, command: &str) -> ConnectionResult<CommandResult> {
        self.journal.push(&self.host, format!("local: {}", command));
        Ok(CommandResult::success(self.stdout.clone(), String::new()))
    }

    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &Path,
        _options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        self.journal.push(
            &self.host,
            format!(
                "upload {} ({} bytes)",
                remote_path.display(),
                content.len()
            ),
        );
        Ok(())
    }
}

// ============================================================================
// Mock Connection Factory
// ============================================================================

/// Hands out [`MockConnection`]s sharing one journal.
#[derive(Debug, Default)]
pub struct MockFactory {
    stdout: String,
    fail_on: Vec<String>,
    unreachable: HashSet<String>,
    journal: Arc<Journal>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn failing_on(mut self, pattern: impl Into<String>) -> Self {
        self.fail_on.push(pattern.into());
        self
    }

    pub fn unreachable(mut self, host: impl Into<String>) -> Self {
        self.unreachable.insert(host.into());
        self
    }

    pub fn journal(&self) -> Arc<Journal> {
        Arc::clone(&self.journal)
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn connect(&self, host: &str) -> ConnectionResult<Arc<dyn Connection>> {
        if self.unreachable.contains(host) {
            return Err(ConnectionError::ConnectionFailed(format!(
                "{}: no route to host",
                host
            )));
        }
        let mut conn = MockConnection::new(host).with_stdout(self.stdout.clone());
        conn.fail_on = self.fail_on.clone();
        conn.journal = Arc::clone(&self.journal);
        Ok(Arc::new(conn))
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// A three-host curvebs cluster.
pub const CURVEBS_TOPOLOGY: &str = r#"
kind: curvebs
global:
  container_image: example/curvebs:v1.2
  data_dir: /data/${service_role}${service_host_sequence}
  log_dir: /logs/${service_role}${service_host_sequence}
  variable:
    target1: 10.0.0.1
    target2: 10.0.0.2
    target3: 10.0.0.3

etcd_services:
  deploy:
    - host: ${target1}
    - host: ${target2}
    - host: ${target3}

mds_services:
  deploy:
    - host: ${target1}
    - host: ${target2}
    - host: ${target3}

chunkserver_services:
  config:
    copysets: 100
  deploy:
    - host: ${target1}
    - host: ${target2}
    - host: ${target3}

snapshotclone_services:
  deploy:
    - host: ${target1}
"#;

/// A two-host curvefs cluster.
pub const CURVEFS_TOPOLOGY: &str = r#"
kind: curvefs
global:
  container_image: example/curvefs:v2
  variable:
    target1: 10.0.0.1
    target2: 10.0.0.2

etcd_services:
  deploy:
    - host: ${target1}
    - host: ${target2}

mds_services:
  deploy:
    - host: ${target1}
    - host: ${target2}

metaserver_services:
  deploy:
    - host: ${target1}
    - host: ${target2}
"#;

/// Inventory covering the fixture topologies' hosts.
pub const HOSTS: &str = r#"
global:
  user: curve
hosts:
  - host: 10.0.0.1
    hostname: 10.0.0.1
  - host: 10.0.0.2
    hostname: 10.0.0.2
  - host: 10.0.0.3
    hostname: 10.0.0.3
  - host: 10.0.0.4
    hostname: 10.0.0.4
"#;

/// A single-role topology with one instance per host.
pub fn chunkserver_topology(hosts: &[&str]) -> String {
    let mut text = String::from(
        "kind: curvebs\nglobal:\n  container_image: example/curvebs:v1\nchunkserver_services:\n",
    );
    if hosts.is_empty() {
        text.push_str("  deploy: []\n");
        return text;
    }
    text.push_str("  deploy:\n");
    for host in hosts {
        text.push_str(&format!("    - host: {}\n", host));
    }
    text
}

// ============================================================================
// Temporary files
// ============================================================================

/// Write `content` to a temporary file kept alive by the returned handle.
pub fn write_temp_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}
