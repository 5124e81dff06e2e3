//! Step lists for the cluster operations.

use super::{ConfigSelector, StepGroup, StepType};
use crate::topology::{DeployConfig, Kind, MigrateServer, Topology, ROLE_CHUNKSERVER, ROLE_MDS};

/// Main steps and post steps of one operation
#[derive(Debug, Clone, Default)]
pub struct Recipe {
    pub steps: Vec<StepGroup>,
    pub post_steps: Vec<StepGroup>,
}

impl Recipe {
    fn push(&mut self, group: StepGroup) {
        self.steps.push(group);
    }

    pub fn step_types(&self) -> Vec<StepType> {
        self.steps.iter().map(StepGroup::step_type).collect()
    }
}

fn of_role(configs: &[DeployConfig], role: &str) -> Vec<DeployConfig> {
    configs.iter().filter(|dc| dc.role() == role).cloned().collect()
}

/// Install the containers of `configs` and write their configuration.
fn prepare(recipe: &mut Recipe, configs: &[DeployConfig]) {
    recipe.push(StepGroup::new(StepType::PullImage, configs.to_vec()));
    recipe.push(StepGroup::new(StepType::CreateContainer, configs.to_vec()));
    recipe.push(StepGroup::new(StepType::SyncConfig, configs.to_vec()));
}

/// Pool step run on the first mds, placing `cluster` in the cluster map.
fn pool_group(
    step_type: StepType,
    mds: &[DeployConfig],
    cluster: &[DeployConfig],
    migrates: &[MigrateServer],
) -> StepGroup {
    StepGroup::new(step_type, mds.to_vec())
        .with_cluster(cluster.to_vec())
        .with_migrates(migrates.to_vec())
}

/// Deploy a whole cluster.
///
/// Roles start in dependency order. For curvebs the physical pool is
/// created once mds runs and before chunkservers start; the logical pool
/// follows the chunkservers. Curvefs creates its pool before the
/// metaservers start.
pub fn deploy(topology: &Topology) -> Recipe {
    let configs = topology.deploy_configs();
    let kind = topology.kind();
    let mds = of_role(configs, ROLE_MDS);
    let storage = of_role(configs, kind.storage_role());
    let mut recipe = Recipe::default();
    prepare(&mut recipe, configs);

    for role in kind.roles() {
        if !configs.iter().any(|dc| dc.role() == *role) {
            continue;
        }
        let pool_before = match kind {
            Kind::CurveBs => StepType::CreatePhysicalPool,
            Kind::CurveFs => StepType::CreateLogicalPool,
        };
        if *role == kind.storage_role() && !mds.is_empty() {
            recipe.push(pool_group(pool_before, &mds, &storage, &[]));
        }
        recipe.push(
            StepGroup::new(StepType::StartService, configs.to_vec())
                .with_selector(ConfigSelector::Role(role.to_string())),
        );
        if *role == ROLE_CHUNKSERVER && !mds.is_empty() {
            recipe.push(pool_group(StepType::CreateLogicalPool, &mds, &storage, &[]));
        }
    }
    recipe
}

/// Move instances to new hosts.
///
/// `topology` is the topology before the migration. The new instances are
/// installed and started, the old ones stopped. Migrating storage
/// instances recreates the pools with the new servers substituted.
pub fn migrate(topology: &Topology, migrates: &[MigrateServer]) -> Recipe {
    let kind = topology.kind();
    let targets: Vec<DeployConfig> = migrates.iter().map(|m| m.to.clone()).collect();
    let sources: Vec<DeployConfig> = migrates.iter().map(|m| m.from.clone()).collect();
    let mut recipe = Recipe::default();
    prepare(&mut recipe, &targets);

    let storage = migrates
        .first()
        .is_some_and(|m| m.from.role() == kind.storage_role());
    let mds = of_role(topology.deploy_configs(), ROLE_MDS);
    if storage && !mds.is_empty() {
        let cluster = of_role(topology.deploy_configs(), kind.storage_role());
        let (before, after) = match kind {
            Kind::CurveBs => (StepType::CreatePhysicalPool, Some(StepType::CreateLogicalPool)),
            Kind::CurveFs => (StepType::CreateLogicalPool, None),
        };
        recipe.push(pool_group(before, &mds, &cluster, migrates));
        recipe.push(StepGroup::new(StepType::StartService, targets));
        if let Some(after) = after {
            recipe.push(pool_group(after, &mds, &cluster, migrates));
        }
        recipe.push(StepGroup::new(StepType::StopService, sources));
    } else {
        recipe.push(StepGroup::new(StepType::StopService, sources));
        recipe.push(StepGroup::new(StepType::StartService, targets));
    }
    recipe
}

/// Add the `added` instances of `topology`, the topology after scaling.
pub fn scale_out(topology: &Topology, added: &[DeployConfig]) -> Recipe {
    let kind = topology.kind();
    let mut recipe = Recipe::default();
    prepare(&mut recipe, added);

    let storage = added.first().is_some_and(|dc| dc.role() == kind.storage_role());
    let mds = of_role(topology.deploy_configs(), ROLE_MDS);
    if storage && !mds.is_empty() {
        let cluster = of_role(topology.deploy_configs(), kind.storage_role());
        let (before, after) = match kind {
            Kind::CurveBs => (StepType::CreatePhysicalPool, Some(StepType::CreateLogicalPool)),
            Kind::CurveFs => (StepType::CreateLogicalPool, None),
        };
        recipe.push(pool_group(before, &mds, &cluster, &[]));
        recipe.push(StepGroup::new(StepType::StartService, added.to_vec()));
        if let Some(after) = after {
            recipe.push(pool_group(after, &mds, &cluster, &[]));
        }
    } else {
        recipe.push(StepGroup::new(StepType::StartService, added.to_vec()));
    }
    recipe
}

/// Collect the container status of every instance.
pub fn status(configs: &[DeployConfig]) -> Recipe {
    Recipe {
        steps: vec![StepGroup::new(StepType::GetServiceStatus, configs.to_vec())],
        post_steps: Vec::new(),
    }
}

/// Check every host can run the cluster, then clean up after the checks.
pub fn precheck(configs: &[DeployConfig]) -> Recipe {
    Recipe {
        steps: vec![
            StepGroup::new(StepType::CheckSshConnect, configs.to_vec()),
            StepGroup::new(StepType::CheckPortInUse, configs.to_vec()),
        ],
        post_steps: vec![StepGroup::new(StepType::CleanPrecheckEnv, configs.to_vec())],
    }
}
