//! Task builders: one task per selected deploy config of a step group.

use tracing::debug;

use super::pool::{ClusterMap, PoolKind};
use super::{PlaybookError, PlaybookResult, StepGroup, StepType};
use crate::configure::catalog::{
    KEY_LISTEN_CLIENT_PORT, KEY_LISTEN_DUMMY_PORT, KEY_LISTEN_PORT, KEY_LISTEN_PROXY_PORT,
};
use crate::connection::{ConnectionFactory, ExecuteOptions};
use crate::executor::{StepContext, StepResult, Task, Tasks};
use crate::modules::{Command, CreateOptions, DockerCommand, InstallFile, Lambda};
use crate::topology::{DeployConfig, Kind};

/// Host directory used by precheck steps
pub const PRECHECK_DIR: &str = "/tmp/storadm-precheck";

/// Status recorded for an instance whose container does not exist
pub const STATUS_NOT_EXIST: &str = "Not Exist";

const STOP_TIMEOUT_SECS: u64 = 30;
const CONFIG_FILE_MODE: u32 = 0o644;

/// Output key holding an instance's container id
pub fn container_id_key(id: &str) -> String {
    format!("{}/container_id", id)
}

/// Output key holding an instance's container status
pub fn status_key(id: &str) -> String {
    format!("{}/status", id)
}

/// Build the task batch for `group`, connecting to each target's host.
pub async fn build_tasks(
    group: &StepGroup,
    factory: &dyn ConnectionFactory,
) -> PlaybookResult<Tasks> {
    let step_type = group.step_type();
    let mut tasks = Tasks::new(step_type.description());
    for dc in group.targets() {
        let conn = factory
            .connect(dc.host())
            .await
            .map_err(|source| PlaybookError::Connect {
                step: step_type,
                host: dc.host().to_string(),
                source,
            })?;
        let task = Task::new(step_type.description(), subname(dc), conn)
            .with_parent_id(dc.parent_id());
        tasks.push(add_steps(task, group, dc)?);
    }
    debug!(step = %step_type, tasks = tasks.len(), "Built step group");
    Ok(tasks)
}

fn subname(dc: &DeployConfig) -> String {
    format!(
        "host={} role={} replica={}/{}",
        dc.host(),
        dc.role(),
        dc.replica_sequence(),
        dc.replicas()
    )
}

fn add_steps(task: Task, group: &StepGroup, dc: &DeployConfig) -> PlaybookResult<Task> {
    let container = dc.container_name();
    let task = match group.step_type() {
        StepType::PullImage => task.step(
            Command::new(DockerCommand::pull(&dc.container_image()).to_string()).named("pull image"),
        ),
        StepType::CreateContainer => create_container(task, dc),
        StepType::SyncConfig => task.step(
            InstallFile::new(
                dc.service_config_text(),
                format!("{}/conf/{}.conf", dc.project_prefix(), dc.role()),
            )
            .mode(CONFIG_FILE_MODE)
            .into_container(container),
        ),
        StepType::StartService => {
            task.step(Command::new(DockerCommand::start(&container).to_string()).named("start"))
        }
        StepType::StopService => task.step(
            Command::new(DockerCommand::stop(&container, Some(STOP_TIMEOUT_SECS)).to_string())
                .named("stop"),
        ),
        StepType::RestartService => {
            task.step(Command::new(DockerCommand::restart(&container).to_string()).named("restart"))
        }
        StepType::CleanService => clean_service(task, dc),
        StepType::GetServiceStatus => service_status(task, dc),
        StepType::CreatePhysicalPool => create_pool(task, group, dc, PoolKind::Physical)?,
        StepType::CreateLogicalPool => create_pool(task, group, dc, PoolKind::Logical)?,
        StepType::CheckSshConnect => task
            .step(Command::new("command -v ssh").local().named("ssh client"))
            .step(Command::new("echo ok").named("ssh connect"))
            .step(InstallFile::new(
                dc.host().as_bytes().to_vec(),
                format!("{}/{}", PRECHECK_DIR, dc.host()),
            )),
        StepType::CheckPortInUse => check_ports(task, dc),
        StepType::CleanPrecheckEnv => task.step(
            Command::new(format!("rm -rf {}", shell_words::quote(PRECHECK_DIR)))
                .named("clean precheck"),
        ),
    };
    Ok(task)
}

fn data_dirs(dc: &DeployConfig) -> Vec<(String, String)> {
    let prefix = dc.project_prefix();
    [
        (dc.log_dir(), format!("{}/logs", prefix)),
        (dc.data_dir(), format!("{}/data", prefix)),
        (dc.core_dir(), "/core".to_string()),
    ]
    .into_iter()
    .filter(|(host_dir, _)| !host_dir.is_empty())
    .collect()
}

fn create_container(mut task: Task, dc: &DeployConfig) -> Task {
    let dirs = data_dirs(dc);
    if !dirs.is_empty() {
        let mkdir = std::iter::once("mkdir")
            .chain(std::iter::once("-p"))
            .chain(dirs.iter().map(|(host_dir, _)| host_dir.as_str()));
        task.add_step(Command::new(shell_words::join(mkdir)).named("create directories"));
    }

    let options = CreateOptions {
        name: dc.container_name(),
        image: dc.container_image(),
        host_network: true,
        volumes: dirs
            .iter()
            .map(|(host_dir, container_dir)| format!("{}:{}", host_dir, container_dir))
            .collect(),
        labels: vec![format!("storadm.id={}", dc.id())],
        command: vec!["--role".to_string(), dc.role().to_string()],
        ..CreateOptions::default()
    };
    task.step(
        Command::new(DockerCommand::create(&options).to_string())
            .named("create container")
            .register("container_id")
            .output(container_id_key(dc.id())),
    )
}

fn clean_service(mut task: Task, dc: &DeployConfig) -> Task {
    task.add_step(
        Command::new(DockerCommand::rm(&dc.container_name(), true).to_string())
            .named("remove container"),
    );
    let dirs: Vec<String> = data_dirs(dc)
        .into_iter()
        .filter(|(_, container_dir)| container_dir != "/core")
        .map(|(host_dir, _)| host_dir)
        .collect();
    if !dirs.is_empty() {
        let rm = ["rm", "-rf"]
            .into_iter()
            .chain(dirs.iter().map(String::as_str));
        task.add_step(Command::new(shell_words::join(rm)).named("remove directories"));
    }
    task
}

fn service_status(task: Task, dc: &DeployConfig) -> Task {
    let key = status_key(dc.id());
    task.step(
        Command::new(
            DockerCommand::inspect(&dc.container_name(), Some("{{.State.Status}}")).to_string(),
        )
        .named("inspect container")
        .register("status")
        .ignore_failure(),
    )
    .step(Lambda::new("record status", move |ctx: &mut StepContext| -> StepResult {
        let status = ctx
            .registered("status")
            .filter(|s| !s.is_empty())
            .unwrap_or(STATUS_NOT_EXIST)
            .to_string();
        ctx.outputs().set(key.clone(), status);
        Ok(())
    }))
}

fn check_ports(mut task: Task, dc: &DeployConfig) -> Task {
    let ports = [
        KEY_LISTEN_PORT,
        KEY_LISTEN_CLIENT_PORT,
        KEY_LISTEN_DUMMY_PORT,
        KEY_LISTEN_PROXY_PORT,
    ]
    .into_iter()
    .filter_map(|key| dc.get(key).and_then(|v| v.as_int()));
    for port in ports {
        task.add_step(
            Command::new(format!(
                "if ss -tln | awk '{{print $4}}' | grep -q ':{port}$'; then \
                 echo 'port {port} is in use' >&2; exit 1; fi"
            ))
            .named(format!("check port {}", port))
            .with_options(ExecuteOptions::new().with_env("LC_ALL", "C")),
        );
    }
    task
}

fn pool_command(kind: Kind, pool_kind: PoolKind, cluster_map: &str) -> String {
    match (kind, pool_kind) {
        (Kind::CurveBs, PoolKind::Physical) => format!(
            "curvebs-tool -op=create_physicalpool -cluster_map={}",
            cluster_map
        ),
        (Kind::CurveBs, PoolKind::Logical) => format!(
            "curvebs-tool -op=create_logicalpool -cluster_map={}",
            cluster_map
        ),
        (Kind::CurveFs, _) => format!("curvefs_tool create-topology -cluster_map={}", cluster_map),
    }
}

fn create_pool(
    task: Task,
    group: &StepGroup,
    dc: &DeployConfig,
    pool_kind: PoolKind,
) -> PlaybookResult<Task> {
    let options = group.options();
    let map = ClusterMap::build(dc.kind(), &options.cluster, &options.migrates, pool_kind);
    let json = map.to_json().map_err(|source| PlaybookError::ClusterMap {
        step: group.step_type(),
        source,
    })?;
    let path = format!("{}/conf/topology.json", dc.project_prefix());
    let container = dc.container_name();
    let command = pool_command(dc.kind(), pool_kind, &path);

    Ok(task
        .step(InstallFile::new(json, path.clone()).into_container(container.clone()))
        .step(Command::new(DockerCommand::exec(&container, &command).to_string()).named("create pool")))
}
