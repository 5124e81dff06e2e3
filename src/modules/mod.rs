//! Built-in steps for storadm
//!
//! Playbook builders assemble tasks from these:
//!
//! - [`Command`] - run a command on the host (or the control node)
//! - [`InstallFile`] - write content to the host, optionally into a container
//! - [`Lambda`] - run a closure over the step context
//!
//! Container operations are [`Command`]s built from [`docker::DockerCommand`].

pub mod docker;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::connection::{ExecuteOptions, TransferOptions};
use crate::executor::{Step, StepContext, StepError, StepResult};

pub use docker::{CreateOptions, DockerCommand};

/// Run a shell command, failing on a non-zero exit code.
#[derive(Debug, Clone)]
pub struct Command {
    name: String,
    command: String,
    local: bool,
    register: Option<String>,
    output: Option<String>,
    options: ExecuteOptions,
    ignore_failure: bool,
}

impl Command {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            name: "command".to_string(),
            command: command.into(),
            local: false,
            register: None,
            output: None,
            options: ExecuteOptions::default(),
            ignore_failure: false,
        }
    }

    /// Label used in logs and errors
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Run on the control node instead of the task's host.
    pub fn local(mut self) -> Self {
        self.local = true;
        self
    }

    /// Store trimmed stdout in the task register under `key`.
    pub fn register(mut self, key: impl Into<String>) -> Self {
        self.register = Some(key.into());
        self
    }

    /// Store trimmed stdout in the playbook outputs under `key`.
    pub fn output(mut self, key: impl Into<String>) -> Self {
        self.output = Some(key.into());
        self
    }

    pub fn with_options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    /// Treat a non-zero exit code as success; stdout is still captured.
    pub fn ignore_failure(mut self) -> Self {
        self.ignore_failure = true;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl Step for Command {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut StepContext) -> StepResult {
        let conn = Arc::clone(ctx.connection());
        let result = if self.local {
            conn.execute_local(&self.command).await?
        } else {
            conn.execute(&self.command, Some(self.options.clone())).await?
        };
        debug!(command = %self.command, exit_code = result.exit_code, "Command finished");

        if !result.success && !self.ignore_failure {
            return Err(StepError::CommandFailed {
                command: self.command.clone(),
                exit_code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            });
        }

        let stdout = result.stdout.trim();
        if let Some(key) = &self.register {
            ctx.register(key.clone(), stdout);
        }
        if let Some(key) = &self.output {
            ctx.outputs().set(key.clone(), stdout);
        }
        Ok(())
    }
}

/// Write content to a file on the host.
///
/// With a container set, the content is staged in a temporary file on the
/// host and copied into the container with `docker cp`.
#[derive(Debug, Clone)]
pub struct InstallFile {
    content: Vec<u8>,
    path: String,
    container: Option<String>,
    mode: Option<u32>,
}

impl InstallFile {
    pub fn new(content: impl Into<Vec<u8>>, path: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            path: path.into(),
            container: None,
            mode: None,
        }
    }

    pub fn into_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }
}

#[async_trait]
impl Step for InstallFile {
    fn name(&self) -> &str {
        "install file"
    }

    async fn execute(&self, ctx: &mut StepContext) -> StepResult {
        let conn = Arc::clone(ctx.connection());
        let mut transfer = TransferOptions::new().with_create_dirs();
        if let Some(mode) = self.mode {
            transfer = transfer.with_mode(mode);
        }

        let Some(container) = &self.container else {
            conn.upload_content(&self.content, Path::new(&self.path), Some(transfer))
                .await?;
            return Ok(());
        };

        let staged = format!("/tmp/storadm-{}", uuid::Uuid::new_v4().simple());
        conn.upload_content(&self.content, Path::new(&staged), Some(transfer))
            .await?;
        let copy = Command::new(format!(
            "{} && rm -f {}",
            DockerCommand::cp(&staged, &format!("{}:{}", container, self.path)),
            shell_words::quote(&staged)
        ))
        .named("copy into container");
        copy.execute(ctx).await
    }
}

type LambdaFn = dyn Fn(&mut StepContext) -> StepResult + Send + Sync;

/// Run a closure over the step context.
#[derive(Clone)]
pub struct Lambda {
    name: String,
    f: Arc<LambdaFn>,
}

impl Lambda {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut StepContext) -> StepResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }
}

impl fmt::Debug for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lambda").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Step for Lambda {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut StepContext) -> StepResult {
        (self.f)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{
        CommandResult, Connection, ConnectionError, ConnectionResult, LocalConnection,
    };
    use crate::executor::Outputs;

    fn context() -> StepContext {
        let conn: Arc<dyn Connection> = Arc::new(LocalConnection::with_identifier("h1"));
        StepContext::new(conn, Outputs::new())
    }

    /// A host that cannot be reached; only the control node answers.
    struct Unreachable;

    #[async_trait]
    impl Connection for Unreachable {
        fn identifier(&self) -> &str {
            "down"
        }

        async fn execute(
            &self,
            _command: &str,
            _options: Option<ExecuteOptions>,
        ) -> ConnectionResult<CommandResult> {
            Err(ConnectionError::ConnectionFailed("down".into()))
        }

        async fn upload_content(
            &self,
            _content: &[u8],
            _remote_path: &Path,
            _options: Option<TransferOptions>,
        ) -> ConnectionResult<()> {
            Err(ConnectionError::ConnectionFailed("down".into()))
        }
    }

    #[tokio::test]
    async fn test_command_registers_stdout() {
        let mut ctx = context();
        Command::new("echo ' abc '")
            .register("id")
            .output("h1/id")
            .execute(&mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.registered("id"), Some("abc"));
        assert_eq!(ctx.outputs().get("h1/id").as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_command_failure() {
        let mut ctx = context();
        let err = Command::new("echo nope >&2; exit 3")
            .execute(&mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StepError::CommandFailed { exit_code: 3, ref stderr, .. } if stderr == "nope"
        ));

        Command::new("exit 3")
            .ignore_failure()
            .execute(&mut ctx)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_local_command_skips_host() {
        let mut ctx = StepContext::new(Arc::new(Unreachable), Outputs::new());
        Command::new("echo control")
            .local()
            .register("where")
            .execute(&mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.registered("where"), Some("control"));

        let err = Command::new("echo host").execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, StepError::Connection(ConnectionError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_command_options_apply() {
        let mut ctx = context();
        let err = Command::new("sleep 10")
            .with_options(ExecuteOptions::new().with_timeout(1))
            .execute(&mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Connection(ConnectionError::Timeout(1))));

        Command::new("test \"$ROLE\" = mds")
            .with_options(ExecuteOptions::new().with_env("ROLE", "mds"))
            .execute(&mut ctx)
            .await
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_install_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etcd.conf");
        let mut ctx = context();

        InstallFile::new("x=1\n", path.display().to_string())
            .mode(0o600)
            .execute(&mut ctx)
            .await
            .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_install_file_to_host() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/mds.conf");
        let mut ctx = context();

        InstallFile::new("a=1\n", path.display().to_string())
            .execute(&mut ctx)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "a=1\n");
    }

    #[tokio::test]
    async fn test_lambda_sees_register() {
        let mut ctx = context();
        ctx.register("status", "running");
        let step = Lambda::new("check", |ctx| {
            let status = ctx.require("status")?.to_string();
            ctx.outputs().set("status", status);
            Ok(())
        });
        step.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.outputs().get("status").as_deref(), Some("running"));
    }
}
