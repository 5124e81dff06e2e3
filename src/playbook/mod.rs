//! Playbooks: ordered step groups run one batch at a time.
//!
//! Each [`StepGroup`] names a [`StepType`], the deploy configs it applies to
//! and its options. Running a [`Playbook`] turns every group into a task
//! batch (see [`steps`]) and hands it to the [`TaskExecutor`]; the next
//! group starts only after the previous batch drained. The first failing
//! group stops the main steps. Post steps always run afterwards.
//!
//! Ready-made step lists for deploy, migrate, scale-out, status and
//! precheck live in [`recipes`].

pub mod pool;
pub mod recipes;
pub mod steps;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::callback::{ExecutionCallback, NullCallback};
use crate::config::DEFAULT_CONCURRENCY;
use crate::connection::{ConnectionError, ConnectionFactory};
use crate::executor::{BatchReport, ExecOptions, ExecutorError, Outputs, TaskExecutor, TaskStatus};
use crate::topology::{DeployConfig, MigrateServer};

pub use recipes::Recipe;

/// Errors that can occur while running a playbook
#[derive(Debug, Error)]
pub enum PlaybookError {
    #[error("{step} failed: {source}")]
    Group {
        step: StepType,
        #[source]
        source: ExecutorError,
    },

    #[error("{step}: cannot connect to host '{host}': {source}")]
    Connect {
        step: StepType,
        host: String,
        #[source]
        source: ConnectionError,
    },

    #[error("{step}: cannot render cluster map: {source}")]
    ClusterMap {
        step: StepType,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for playbook operations
pub type PlaybookResult<T> = Result<T, PlaybookError>;

/// Catalog of step types a playbook can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    PullImage,
    CreateContainer,
    SyncConfig,
    StartService,
    StopService,
    RestartService,
    CleanService,
    GetServiceStatus,
    CreatePhysicalPool,
    CreateLogicalPool,
    CheckSshConnect,
    CheckPortInUse,
    CleanPrecheckEnv,
}

impl StepType {
    /// Human-readable name, used as the task and batch label
    pub fn description(&self) -> &'static str {
        match self {
            StepType::PullImage => "Pull Image",
            StepType::CreateContainer => "Create Container",
            StepType::SyncConfig => "Sync Config",
            StepType::StartService => "Start Service",
            StepType::StopService => "Stop Service",
            StepType::RestartService => "Restart Service",
            StepType::CleanService => "Clean Service",
            StepType::GetServiceStatus => "Get Service Status",
            StepType::CreatePhysicalPool => "Create Physical Pool",
            StepType::CreateLogicalPool => "Create Logical Pool",
            StepType::CheckSshConnect => "Check SSH Connect",
            StepType::CheckPortInUse => "Check Port In Use",
            StepType::CleanPrecheckEnv => "Clean Precheck Environment",
        }
    }

    /// Which of a group's configs get a task by default.
    ///
    /// Pools are created once, from the first config handed to the group.
    /// Host-level checks run once per host.
    pub fn selector(&self) -> ConfigSelector {
        match self {
            StepType::CreatePhysicalPool | StepType::CreateLogicalPool => ConfigSelector::First,
            StepType::CheckSshConnect | StepType::CleanPrecheckEnv => ConfigSelector::UniqueHosts,
            _ => ConfigSelector::All,
        }
    }

    /// Executor options a group of this type starts with
    pub fn exec_options(&self) -> ExecOptions {
        match self {
            StepType::GetServiceStatus => ExecOptions {
                silent_sub_bar: true,
                skip_error_on_failure: true,
                ..ExecOptions::default()
            },
            StepType::CheckSshConnect | StepType::CheckPortInUse => ExecOptions {
                silent_sub_bar: true,
                ..ExecOptions::default()
            },
            StepType::CleanPrecheckEnv => ExecOptions {
                silent_sub_bar: true,
                skip_error_on_failure: true,
                ..ExecOptions::default()
            },
            _ => ExecOptions::default(),
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Picks the deploy configs a step group runs against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSelector {
    All,
    /// Only the first config
    First,
    /// Configs of one role
    Role(String),
    /// The first config of every distinct host
    UniqueHosts,
}

impl ConfigSelector {
    pub fn select<'a>(&self, configs: &'a [DeployConfig]) -> Vec<&'a DeployConfig> {
        match self {
            ConfigSelector::All => configs.iter().collect(),
            ConfigSelector::First => configs.iter().take(1).collect(),
            ConfigSelector::Role(role) => configs.iter().filter(|dc| dc.role() == role).collect(),
            ConfigSelector::UniqueHosts => {
                let mut seen = HashSet::new();
                configs
                    .iter()
                    .filter(|dc| seen.insert(dc.host()))
                    .collect()
            }
        }
    }
}

/// Extra inputs a step builder may need besides the targets
#[derive(Debug, Clone, Default)]
pub struct StepOptions {
    /// Instances placed in the cluster map by pool steps
    pub cluster: Vec<DeployConfig>,
    /// Migration pairs; pool steps substitute `to` for `from`
    pub migrates: Vec<MigrateServer>,
}

/// One entry of a playbook
#[derive(Debug, Clone)]
pub struct StepGroup {
    step_type: StepType,
    configs: Vec<DeployConfig>,
    selector: ConfigSelector,
    options: StepOptions,
    exec: ExecOptions,
}

impl StepGroup {
    pub fn new(step_type: StepType, configs: impl Into<Vec<DeployConfig>>) -> Self {
        Self {
            step_type,
            configs: configs.into(),
            selector: step_type.selector(),
            options: StepOptions::default(),
            exec: step_type.exec_options(),
        }
    }

    pub fn with_selector(mut self, selector: ConfigSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_cluster(mut self, cluster: impl Into<Vec<DeployConfig>>) -> Self {
        self.options.cluster = cluster.into();
        self
    }

    pub fn with_migrates(mut self, migrates: impl Into<Vec<MigrateServer>>) -> Self {
        self.options.migrates = migrates.into();
        self
    }

    pub fn with_exec_options(mut self, exec: ExecOptions) -> Self {
        self.exec = exec;
        self
    }

    pub fn step_type(&self) -> StepType {
        self.step_type
    }

    pub fn configs(&self) -> &[DeployConfig] {
        &self.configs
    }

    pub fn options(&self) -> &StepOptions {
        &self.options
    }

    pub fn exec_options(&self) -> &ExecOptions {
        &self.exec
    }

    /// Configs that get one task each
    pub fn targets(&self) -> Vec<&DeployConfig> {
        self.selector.select(&self.configs)
    }
}

/// Outcome of one step group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    pub step_type: StepType,
    /// Whether the group was a post step
    pub post: bool,
    pub batch: BatchReport,
}

/// Outcome of a playbook run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaybookReport {
    /// Groups that ran, in order; groups after a failure are absent
    pub groups: Vec<GroupReport>,
    /// Values steps published while running
    pub outputs: BTreeMap<String, String>,
}

impl PlaybookReport {
    pub fn success(&self) -> bool {
        self.groups.iter().all(|g| g.batch.success())
    }

    /// Report of the last group of `step_type` that ran
    pub fn group(&self, step_type: StepType) -> Option<&GroupReport> {
        self.groups.iter().rev().find(|g| g.step_type == step_type)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.groups.iter().map(|g| g.batch.count(status)).sum()
    }
}

/// A finished playbook: its report and the error that stopped it, if any.
#[derive(Debug)]
pub struct PlaybookOutcome {
    pub report: PlaybookReport,
    pub error: Option<PlaybookError>,
}

impl PlaybookOutcome {
    pub fn into_result(self) -> PlaybookResult<PlaybookReport> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.report),
        }
    }
}

/// An ordered list of step groups plus post steps
pub struct Playbook {
    factory: Arc<dyn ConnectionFactory>,
    callback: Arc<dyn ExecutionCallback>,
    concurrency: usize,
    steps: Vec<StepGroup>,
    post_steps: Vec<StepGroup>,
}

impl Playbook {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            callback: Arc::new(NullCallback),
            concurrency: DEFAULT_CONCURRENCY,
            steps: Vec::new(),
            post_steps: Vec::new(),
        }
    }

    pub fn with_callback(mut self, callback: Arc<dyn ExecutionCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Tasks in flight per group; 0 selects the default.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Append every step and post step of `recipe`.
    pub fn with_recipe(mut self, recipe: Recipe) -> Self {
        self.steps.extend(recipe.steps);
        self.post_steps.extend(recipe.post_steps);
        self
    }

    pub fn add_step(&mut self, group: StepGroup) {
        self.steps.push(group);
    }

    /// Add a group that runs after the main steps, even if one failed.
    pub fn add_post_step(&mut self, group: StepGroup) {
        self.post_steps.push(group);
    }

    pub fn steps(&self) -> &[StepGroup] {
        &self.steps
    }

    pub fn post_steps(&self) -> &[StepGroup] {
        &self.post_steps
    }

    /// Run the playbook and return its report, or the first error.
    pub async fn run(&self) -> PlaybookResult<PlaybookReport> {
        self.execute().await.into_result()
    }

    /// Run every group to completion and report what happened.
    ///
    /// A failing main group stops the remaining main groups. Post steps
    /// all run regardless; their errors are returned only when the main
    /// steps succeeded.
    #[instrument(skip(self), fields(steps = self.steps.len(), post_steps = self.post_steps.len()))]
    pub async fn execute(&self) -> PlaybookOutcome {
        let outputs = Outputs::new();
        let executor =
            TaskExecutor::with_callback(Arc::clone(&self.callback)).with_outputs(outputs.clone());
        let mut report = PlaybookReport::default();
        let mut first_error = None;

        self.callback
            .on_playbook_start(self.steps.len() + self.post_steps.len())
            .await;

        for group in &self.steps {
            if let Err(e) = self.run_group(&executor, group, false, &mut report).await {
                error!(step = %group.step_type(), error = %e, "Step group failed, stopping playbook");
                first_error = Some(e);
                break;
            }
        }

        for group in &self.post_steps {
            if let Err(e) = self.run_group(&executor, group, true, &mut report).await {
                warn!(step = %group.step_type(), error = %e, "Post step failed");
                first_error.get_or_insert(e);
            }
        }

        report.outputs = outputs.snapshot();
        self.callback.on_playbook_end(first_error.is_none()).await;
        info!(
            groups = report.groups.len(),
            success = first_error.is_none(),
            "Playbook finished"
        );
        PlaybookOutcome {
            report,
            error: first_error,
        }
    }

    async fn run_group(
        &self,
        executor: &TaskExecutor,
        group: &StepGroup,
        post: bool,
        report: &mut PlaybookReport,
    ) -> PlaybookResult<()> {
        let tasks = steps::build_tasks(group, self.factory.as_ref()).await?;
        let options = ExecOptions {
            concurrency: self.concurrency,
            ..*group.exec_options()
        };
        let outcome = executor.execute(tasks, &options).await;
        report.groups.push(GroupReport {
            step_type: group.step_type(),
            post,
            batch: outcome.report,
        });
        match outcome.error {
            Some(e) => Err(PlaybookError::Group {
                step: group.step_type(),
                source: e.into(),
            }),
            None => Ok(()),
        }
    }
}
