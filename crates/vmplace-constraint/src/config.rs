//! Instance description file.
//!
//! ```toml
//! objective = "min_mttr"
//!
//! [[nodes]]
//! id = 1
//!
//! [[nodes]]
//! id = 2
//! online = false
//!
//! [[vms]]
//! id = 1
//! state = "running"
//! host = 1
//!
//! [[resources]]
//! id = "cpu"
//! default_capacity = 8
//! consumptions = [{ vm = 1, value = 2 }]
//!
//! [[constraints]]
//! type = "ban"
//! vm = 1
//! nodes = [2]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vmplace_core::{Model, Node, ShareableResource, Vm, VmState};

use crate::constraint::Constraint;
use crate::error::{ConstraintError, ConstraintResult};
use crate::instance::Instance;
use crate::objective::Objective;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub objective: Option<Objective>,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub vms: Vec<VmConfig>,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

fn online_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: u32,
    #[serde(default = "online_by_default")]
    pub online: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmStateConfig {
    Ready,
    Running,
    Sleeping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmConfig {
    pub id: u32,
    pub state: VmStateConfig,
    /// Required for running and sleeping VMs.
    pub host: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub id: String,
    #[serde(default)]
    pub default_capacity: u32,
    #[serde(default)]
    pub default_consumption: u32,
    #[serde(default)]
    pub capacities: Vec<NodeValue>,
    #[serde(default)]
    pub consumptions: Vec<VmValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeValue {
    pub node: u32,
    pub value: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmValue {
    pub vm: u32,
    pub value: u32,
}

impl InstanceConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: InstanceConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Describe an existing instance.
    pub fn from_instance(inst: &Instance) -> Self {
        let mo = inst.model();
        let map = mo.mapping();
        let mut nodes: Vec<NodeConfig> = map
            .all_nodes()
            .into_iter()
            .map(|n| NodeConfig {
                id: n.id(),
                online: map.is_online(n),
            })
            .collect();
        nodes.sort_by_key(|n| n.id);
        let vms = map
            .all_vms()
            .into_iter()
            .filter_map(|vm| {
                let state = map.vm_state(vm)?;
                let (state, host) = match state {
                    VmState::Ready => (VmStateConfig::Ready, None),
                    VmState::Running(n) => (VmStateConfig::Running, Some(n.id())),
                    VmState::Sleeping(n) => (VmStateConfig::Sleeping, Some(n.id())),
                };
                Some(VmConfig { id: vm.id(), state, host })
            })
            .collect();
        let resources = mo
            .views()
            .filter_map(|v| v.as_resource())
            .map(|rc| ResourceConfig {
                id: rc.id().to_string(),
                default_capacity: rc.default_capacity(),
                default_consumption: rc.default_consumption(),
                capacities: map
                    .all_nodes()
                    .into_iter()
                    .filter(|n| rc.capacity_defined(*n))
                    .map(|n| NodeValue {
                        node: n.id(),
                        value: rc.capacity(n),
                    })
                    .collect(),
                consumptions: map
                    .all_vms()
                    .into_iter()
                    .filter(|vm| rc.consumption_defined(*vm))
                    .map(|vm| VmValue {
                        vm: vm.id(),
                        value: rc.consumption(vm),
                    })
                    .collect(),
            })
            .collect();
        Self {
            objective: inst.objective(),
            nodes,
            vms,
            resources,
            constraints: inst.constraints().to_vec(),
        }
    }

    /// Build and validate the described instance.
    pub fn build(&self) -> ConstraintResult<Instance> {
        let mut mo = Model::new();
        for n in &self.nodes {
            let node = mo.claim_node(n.id)?;
            if n.online {
                mo.mapping_mut().add_online_node(node);
            } else {
                mo.mapping_mut().add_offline_node(node)?;
            }
        }
        for v in &self.vms {
            let vm = mo.claim_vm(v.id)?;
            match (v.state, v.host) {
                (VmStateConfig::Ready, _) => mo.mapping_mut().add_ready_vm(vm),
                (VmStateConfig::Running, Some(h)) => mo.mapping_mut().add_running_vm(vm, Node::new(h))?,
                (VmStateConfig::Sleeping, Some(h)) => mo.mapping_mut().add_sleeping_vm(vm, Node::new(h))?,
                (_, None) => {
                    return Err(ConstraintError::Config(format!("{vm} is placed but has no host")));
                }
            }
        }
        for r in &self.resources {
            let mut rc = ShareableResource::with_defaults(r.id.as_str(), r.default_capacity, r.default_consumption);
            for c in &r.capacities {
                rc.set_capacity(Node::new(c.node), c.value);
            }
            for c in &r.consumptions {
                rc.set_consumption(Vm::new(c.vm), c.value);
            }
            if mo.attach(rc).is_some() {
                return Err(ConstraintError::Config(format!("resource '{}' is declared twice", r.id)));
            }
        }
        debug!(
            nodes = self.nodes.len(),
            vms = self.vms.len(),
            constraints = self.constraints.len(),
            "instance built"
        );
        Instance::new(mo, self.constraints.clone(), self.objective)
    }
}
