//! Configuration module for storadm
//!
//! Handles loading and merging tool configuration from multiple sources:
//! - Default values
//! - User configuration (~/.storadm/storadm.toml)
//! - Project configuration (./storadm.toml)
//! - Environment variables
//!
//! This is the configuration of the tool itself; cluster topology and host
//! inventory are separate documents.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Concurrency used when none is configured
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default settings
    pub defaults: Defaults,

    /// SSH settings
    pub ssh: SshConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Default execution settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Tasks run at once within one step group
    pub concurrency: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// SSH transport settings, applied to every connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Connect timeout in seconds
    pub timeout: u64,

    /// Attempts after a transport failure
    pub retries: u32,

    /// User for hosts that do not set one
    pub user: Option<String>,

    /// Key for hosts that do not set one
    pub private_key_file: Option<PathBuf>,

    /// Verify host keys against the user's known hosts.
    ///
    /// When false, unknown or changed host keys are accepted and nothing is
    /// written to `known_hosts`.
    pub strict_host_key_checking: bool,

    /// Extra arguments for the ssh client
    pub ssh_args: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            timeout: 10,
            retries: 3,
            user: None,
            private_key_file: None,
            strict_host_key_checking: true,
            ssh_args: Vec::new(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `storadm=debug`
    pub level: Option<String>,
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Config::default();

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                config = config.merge_from_file(&path)?;
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Get the list of configuration file paths to check
    fn get_config_paths(explicit_path: Option<&PathBuf>) -> Vec<PathBuf> {
        if let Some(path) = explicit_path {
            return vec![path.clone()];
        }

        let mut paths = Vec::new();
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".storadm/storadm.toml"));
        }
        paths.push(PathBuf::from("storadm.toml"));
        paths
    }

    /// Merge configuration from a file
    fn merge_from_file(&self, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let file_config: Config = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };

        Ok(self.merge(file_config))
    }

    /// Merge another config into this one; values differing from the
    /// defaults in `other` take precedence.
    fn merge(&self, other: Config) -> Config {
        let defaults = Config::default();
        Config {
            defaults: Defaults {
                concurrency: if other.defaults.concurrency != defaults.defaults.concurrency {
                    other.defaults.concurrency
                } else {
                    self.defaults.concurrency
                },
            },
            ssh: SshConfig {
                timeout: if other.ssh.timeout != defaults.ssh.timeout {
                    other.ssh.timeout
                } else {
                    self.ssh.timeout
                },
                retries: if other.ssh.retries != defaults.ssh.retries {
                    other.ssh.retries
                } else {
                    self.ssh.retries
                },
                user: other.ssh.user.or_else(|| self.ssh.user.clone()),
                private_key_file: other
                    .ssh
                    .private_key_file
                    .or_else(|| self.ssh.private_key_file.clone()),
                strict_host_key_checking: other.ssh.strict_host_key_checking
                    && self.ssh.strict_host_key_checking,
                ssh_args: if other.ssh.ssh_args != defaults.ssh.ssh_args {
                    other.ssh.ssh_args
                } else {
                    self.ssh.ssh_args.clone()
                },
            },
            logging: LoggingConfig {
                level: other.logging.level.or_else(|| self.logging.level.clone()),
            },
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(n) = std::env::var("STORADM_CONCURRENCY") {
            if let Ok(n) = n.parse() {
                self.defaults.concurrency = n;
            }
        }

        if let Ok(timeout) = std::env::var("STORADM_SSH_TIMEOUT") {
            if let Ok(n) = timeout.parse() {
                self.ssh.timeout = n;
            }
        }

        if let Ok(retries) = std::env::var("STORADM_SSH_RETRIES") {
            if let Ok(n) = retries.parse() {
                self.ssh.retries = n;
            }
        }

        if let Ok(level) = std::env::var("STORADM_LOG_LEVEL") {
            self.logging.level = Some(level);
        }
    }

    /// Load from a specific file only, without environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Config::default().merge_from_file(path.as_ref())
    }
}
