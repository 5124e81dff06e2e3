//! SSH connection module
//!
//! Drives the system `ssh` client. Each call is one ssh invocation; an exit
//! status of 255 means the transport failed before the command ran and is
//! retried up to the configured retry count.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::{
    wrap_command, CommandResult, Connection, ConnectionError, ConnectionFactory, ConnectionResult,
    ExecuteOptions, TransferOptions,
};
use crate::config::SshConfig;
use crate::inventory::{HostConfig, Hosts};

/// Exit status the ssh client reports for its own failures
const SSH_TRANSPORT_FAILURE: i32 = 255;

const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Connection to one inventory host through the system ssh client
#[derive(Debug, Clone)]
pub struct SshConnection {
    host: HostConfig,
    config: SshConfig,
}

impl SshConnection {
    pub fn new(host: HostConfig, config: SshConfig) -> Self {
        Self { host, config }
    }

    pub fn host(&self) -> &HostConfig {
        &self.host
    }

    /// Arguments passed to `ssh` before the remote command.
    pub fn ssh_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.host.ssh_port.to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.timeout),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ];
        if !self.host.private_key_file.is_empty() {
            args.push("-i".to_string());
            args.push(self.host.private_key_file.clone());
        }
        if self.host.forward_agent {
            args.push("-A".to_string());
        }
        if !self.config.strict_host_key_checking {
            args.extend(
                [
                    "-o",
                    "StrictHostKeyChecking=no",
                    "-o",
                    "UserKnownHostsFile=/dev/null",
                ]
                .map(String::from),
            );
        }
        args.extend(self.config.ssh_args.iter().cloned());
        args.push(format!("{}@{}", self.host.user, self.host.hostname));
        args
    }

    fn options_for_host(&self, options: Option<ExecuteOptions>) -> ExecuteOptions {
        let mut options = options.unwrap_or_default();
        let mut env: Vec<(String, String)> = self
            .host
            .envs
            .iter()
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        env.append(&mut options.env);
        options.env = env;
        if options.become_user.is_none() {
            options.become_user = self.host.become_user.clone();
        }
        options
    }

    async fn run(
        &self,
        remote: &str,
        stdin: Option<&[u8]>,
        timeout: Option<u64>,
    ) -> ConnectionResult<CommandResult> {
        let attempts = self.config.retries.max(1);
        let mut last = None;

        for attempt in 1..=attempts {
            let result = self.run_once(remote, stdin, timeout).await?;
            if result.exit_code != SSH_TRANSPORT_FAILURE {
                return Ok(result);
            }
            warn!(
                host = %self.host.host,
                attempt = attempt,
                stderr = %result.stderr.trim(),
                "SSH transport failure"
            );
            last = Some(result);
            if attempt < attempts {
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }

        let stderr = last.map(|r| r.stderr).unwrap_or_default();
        Err(ConnectionError::ConnectionFailed(format!(
            "{}@{}:{}: {}",
            self.host.user,
            self.host.hostname,
            self.host.ssh_port,
            stderr.trim()
        )))
    }

    async fn run_once(
        &self,
        remote: &str,
        stdin: Option<&[u8]>,
        timeout: Option<u64>,
    ) -> ConnectionResult<CommandResult> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.ssh_args())
            .arg(remote)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to spawn ssh: {}", e))
        })?;

        if let Some(content) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(content).await?;
                pipe.shutdown().await?;
            }
        }

        let output = match timeout {
            Some(secs) => {
                tokio::time::timeout(Duration::from_secs(secs), child.wait_with_output())
                    .await
                    .map_err(|_| ConnectionError::Timeout(secs))??
            }
            None => child.wait_with_output().await?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        match output.status.code() {
            Some(0) => Ok(CommandResult::success(stdout, stderr)),
            Some(code) => Ok(CommandResult::failure(code, stdout, stderr)),
            None => Err(ConnectionError::ExecutionFailed(
                "ssh terminated by signal".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Connection for SshConnection {
    fn identifier(&self) -> &str {
        &self.host.host
    }

    #[instrument(skip(self, options), fields(host = %self.host.host))]
    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let options = self.options_for_host(options);
        let remote = wrap_command(command, &options);
        debug!(command = %remote, "Executing remote command");
        self.run(&remote, None, options.timeout).await
    }

    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        let options = options.unwrap_or_default();
        let path = remote_path.to_string_lossy();
        let quoted = shell_words::quote(&path);

        let mut script = String::new();
        if options.create_dirs {
            if let Some(parent) = remote_path.parent() {
                script.push_str(&format!(
                    "mkdir -p {} && ",
                    shell_words::quote(&parent.to_string_lossy())
                ));
            }
        }
        script.push_str(&format!("cat > {}", quoted));
        if let Some(mode) = options.mode {
            script.push_str(&format!(" && chmod {:o} {}", mode, quoted));
        }

        let wrapped = wrap_command(&script, &self.options_for_host(None));
        debug!(dst = %path, size = content.len(), host = %self.host.host, "Uploading content");
        let result = self.run(&wrapped, Some(content), None).await?;
        if result.success {
            Ok(())
        } else {
            Err(ConnectionError::TransferFailed(format!(
                "{}: {}",
                path,
                result.stderr.trim()
            )))
        }
    }
}

/// Resolves topology host names through the inventory and caches one
/// connection per host.
pub struct SshConnectionFactory {
    hosts: Hosts,
    config: SshConfig,
    cache: Mutex<HashMap<String, Arc<dyn Connection>>>,
}

impl SshConnectionFactory {
    pub fn new(hosts: Hosts, config: SshConfig) -> Self {
        Self {
            hosts,
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ConnectionFactory for SshConnectionFactory {
    async fn connect(&self, host: &str) -> ConnectionResult<Arc<dyn Connection>> {
        let mut cache = self.cache.lock();
        if let Some(conn) = cache.get(host) {
            return Ok(Arc::clone(conn));
        }

        let mut host_config = self
            .hosts
            .get(host)
            .map_err(|_| ConnectionError::HostNotFound(host.to_string()))?
            .clone();
        if let Some(user) = &self.config.user {
            if host_config.user.is_empty() {
                host_config.user = user.clone();
            }
        }
        if host_config.private_key_file.is_empty() {
            if let Some(key) = &self.config.private_key_file {
                host_config.private_key_file = key.display().to_string();
            }
        }

        let conn: Arc<dyn Connection> =
            Arc::new(SshConnection::new(host_config, self.config.clone()));
        cache.insert(host.to_string(), Arc::clone(&conn));
        Ok(conn)
    }
}
