//! Docker command lines.
//!
//! Containers are driven through the `docker` CLI on each host. This module
//! only builds the command lines; running them is the job of a
//! [`Command`](super::Command) step. Every argument is shell-quoted.

use std::fmt;

/// Options for `docker create`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    pub name: String,
    pub image: String,
    /// Host network namespace
    pub host_network: bool,
    pub privileged: bool,
    pub restart: Option<String>,
    /// `KEY=value` pairs
    pub envs: Vec<String>,
    /// `host:container` bind mounts
    pub volumes: Vec<String>,
    pub labels: Vec<String>,
    pub entrypoint: Option<String>,
    /// Arguments after the image
    pub command: Vec<String>,
}

/// One `docker` invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerCommand {
    args: Vec<String>,
}

impl DockerCommand {
    fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn pull(image: &str) -> Self {
        Self::new(["pull", image])
    }

    pub fn create(options: &CreateOptions) -> Self {
        let mut args = vec!["create".to_string(), "--name".to_string(), options.name.clone()];
        if options.host_network {
            args.extend(["--network".to_string(), "host".to_string()]);
        }
        if options.privileged {
            args.push("--privileged".to_string());
        }
        if let Some(policy) = &options.restart {
            args.extend(["--restart".to_string(), policy.clone()]);
        }
        for env in &options.envs {
            args.extend(["--env".to_string(), env.clone()]);
        }
        for volume in &options.volumes {
            args.extend(["--volume".to_string(), volume.clone()]);
        }
        for label in &options.labels {
            args.extend(["--label".to_string(), label.clone()]);
        }
        if let Some(entrypoint) = &options.entrypoint {
            args.extend(["--entrypoint".to_string(), entrypoint.clone()]);
        }
        args.push(options.image.clone());
        args.extend(options.command.iter().cloned());
        Self { args }
    }

    pub fn start(container: &str) -> Self {
        Self::new(["start", container])
    }

    pub fn stop(container: &str, timeout_secs: Option<u64>) -> Self {
        let mut cmd = Self::new(["stop"]);
        if let Some(secs) = timeout_secs {
            cmd.args.extend(["--time".to_string(), secs.to_string()]);
        }
        cmd.args.push(container.to_string());
        cmd
    }

    pub fn restart(container: &str) -> Self {
        Self::new(["restart", container])
    }

    pub fn rm(container: &str, force: bool) -> Self {
        if force {
            Self::new(["rm", "--force", container])
        } else {
            Self::new(["rm", container])
        }
    }

    /// `docker inspect`, optionally with a Go template
    pub fn inspect(container: &str, format: Option<&str>) -> Self {
        let mut cmd = Self::new(["inspect"]);
        if let Some(format) = format {
            cmd.args.extend(["--format".to_string(), format.to_string()]);
        }
        cmd.args.push(container.to_string());
        cmd
    }

    /// Run `command` through a shell inside the container.
    pub fn exec(container: &str, command: &str) -> Self {
        Self::new(["exec", container, "/bin/bash", "-c", command])
    }

    /// Copy between the host and a container, `container:path` on either side.
    pub fn cp(src: &str, dst: &str) -> Self {
        Self::new(["cp", src, dst])
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for DockerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = std::iter::once("docker").chain(self.args.iter().map(String::as_str));
        f.write_str(&shell_words::join(words))
    }
}
