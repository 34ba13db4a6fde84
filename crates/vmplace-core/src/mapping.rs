//! Placement state of VMs and nodes.
//!
//! Invariants maintained by every mutation:
//! - a VM is in exactly one state: ready, running on a node or sleeping on a node;
//! - the host of a running or sleeping VM is an online node;
//! - online and offline nodes are disjoint.
//!
//! A mutation that cannot keep these invariants returns an error and leaves
//! the mapping untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::element::{Node, Vm};
use crate::error::{ModelError, ModelResult};

/// State of a VM inside a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "host", rename_all = "snake_case")]
pub enum VmState {
    Ready,
    Running(Node),
    Sleeping(Node),
}

impl VmState {
    /// The hosting node, if any.
    pub fn host(&self) -> Option<Node> {
        match self {
            VmState::Ready => None,
            VmState::Running(n) | VmState::Sleeping(n) => Some(*n),
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmState::Ready => f.write_str("ready"),
            VmState::Running(n) => write!(f, "running on {n}"),
            VmState::Sleeping(n) => write!(f, "sleeping on {n}"),
        }
    }
}

/// Serialized form of a [`Mapping`]. The per-node indexes are rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MappingRecord {
    online: BTreeSet<Node>,
    offline: BTreeSet<Node>,
    vms: BTreeMap<Vm, VmState>,
}

/// The full placement state of an infrastructure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MappingRecord", into = "MappingRecord")]
pub struct Mapping {
    online: BTreeSet<Node>,
    offline: BTreeSet<Node>,
    vms: BTreeMap<Vm, VmState>,
    running: BTreeMap<Node, BTreeSet<Vm>>,
    sleeping: BTreeMap<Node, BTreeSet<Vm>>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Nodes ───────────────────────────────────────────────────────

    /// Declare a node online. An offline node is switched online.
    pub fn add_online_node(&mut self, n: Node) {
        self.offline.remove(&n);
        self.online.insert(n);
    }

    /// Declare a node offline. Fails if the node is online and hosts VMs.
    pub fn add_offline_node(&mut self, n: Node) -> ModelResult<()> {
        let hosted = self.hosted_count(n);
        if hosted > 0 {
            return Err(ModelError::NodeNotEmpty(n, hosted));
        }
        self.online.remove(&n);
        self.running.remove(&n);
        self.sleeping.remove(&n);
        self.offline.insert(n);
        Ok(())
    }

    /// Switch a known node online.
    pub fn set_online(&mut self, n: Node) -> ModelResult<()> {
        if !self.contains_node(n) {
            return Err(ModelError::UnknownNode(n));
        }
        self.add_online_node(n);
        Ok(())
    }

    /// Switch a known node offline. The node must not host any VM.
    pub fn set_offline(&mut self, n: Node) -> ModelResult<()> {
        if !self.contains_node(n) {
            return Err(ModelError::UnknownNode(n));
        }
        self.add_offline_node(n)
    }

    /// Forget a node. The node must not host any VM.
    pub fn remove_node(&mut self, n: Node) -> ModelResult<bool> {
        let hosted = self.hosted_count(n);
        if hosted > 0 {
            return Err(ModelError::NodeNotEmpty(n, hosted));
        }
        self.running.remove(&n);
        self.sleeping.remove(&n);
        Ok(self.online.remove(&n) || self.offline.remove(&n))
    }

    // ── VMs ─────────────────────────────────────────────────────────

    /// Set a VM ready, whatever its previous state.
    pub fn add_ready_vm(&mut self, vm: Vm) {
        self.detach(vm);
        self.vms.insert(vm, VmState::Ready);
    }

    /// Set a VM running on an online node, whatever its previous state.
    pub fn add_running_vm(&mut self, vm: Vm, n: Node) -> ModelResult<()> {
        self.ensure_online(n)?;
        self.detach(vm);
        self.running.entry(n).or_default().insert(vm);
        self.vms.insert(vm, VmState::Running(n));
        Ok(())
    }

    /// Set a VM sleeping on an online node, whatever its previous state.
    pub fn add_sleeping_vm(&mut self, vm: Vm, n: Node) -> ModelResult<()> {
        self.ensure_online(n)?;
        self.detach(vm);
        self.sleeping.entry(n).or_default().insert(vm);
        self.vms.insert(vm, VmState::Sleeping(n));
        Ok(())
    }

    /// Forget a VM. Returns `false` if the VM was unknown.
    pub fn remove_vm(&mut self, vm: Vm) -> bool {
        self.detach(vm);
        self.vms.remove(&vm).is_some()
    }

    /// Replace a VM identity by another one, keeping its state.
    pub fn substitute_vm(&mut self, old: Vm, new: Vm) -> ModelResult<()> {
        if old == new {
            return Ok(());
        }
        if self.vms.contains_key(&new) {
            return Err(ModelError::VmAlreadyPlaced(new));
        }
        let state = self.vms.get(&old).copied().ok_or(ModelError::UnknownVm(old))?;
        self.detach(old);
        self.vms.remove(&old);
        match state {
            VmState::Ready => {}
            VmState::Running(n) => {
                self.running.entry(n).or_default().insert(new);
            }
            VmState::Sleeping(n) => {
                self.sleeping.entry(n).or_default().insert(new);
            }
        }
        self.vms.insert(new, state);
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn online_nodes(&self) -> &BTreeSet<Node> {
        &self.online
    }

    pub fn offline_nodes(&self) -> &BTreeSet<Node> {
        &self.offline
    }

    pub fn all_nodes(&self) -> BTreeSet<Node> {
        self.online.union(&self.offline).copied().collect()
    }

    pub fn all_vms(&self) -> BTreeSet<Vm> {
        self.vms.keys().copied().collect()
    }

    pub fn ready_vms(&self) -> BTreeSet<Vm> {
        self.vms_in(|s| matches!(s, VmState::Ready))
    }

    pub fn running_vms(&self) -> BTreeSet<Vm> {
        self.vms_in(|s| matches!(s, VmState::Running(_)))
    }

    pub fn sleeping_vms(&self) -> BTreeSet<Vm> {
        self.vms_in(|s| matches!(s, VmState::Sleeping(_)))
    }

    /// VMs running on a node. Empty for an unknown or offline node.
    pub fn running_vms_on(&self, n: Node) -> BTreeSet<Vm> {
        self.running.get(&n).cloned().unwrap_or_default()
    }

    /// VMs sleeping on a node. Empty for an unknown or offline node.
    pub fn sleeping_vms_on(&self, n: Node) -> BTreeSet<Vm> {
        self.sleeping.get(&n).cloned().unwrap_or_default()
    }

    /// VMs running on any of the given nodes.
    pub fn running_vms_on_any<'a, I>(&self, nodes: I) -> BTreeSet<Vm>
    where
        I: IntoIterator<Item = &'a Node>,
    {
        nodes
            .into_iter()
            .filter_map(|n| self.running.get(n))
            .flatten()
            .copied()
            .collect()
    }

    /// Number of VMs running on a node.
    pub fn running_count(&self, n: Node) -> usize {
        self.running.get(&n).map_or(0, BTreeSet::len)
    }

    pub fn vm_state(&self, vm: Vm) -> Option<VmState> {
        self.vms.get(&vm).copied()
    }

    /// Host of a running or sleeping VM.
    pub fn vm_location(&self, vm: Vm) -> Option<Node> {
        self.vms.get(&vm).and_then(VmState::host)
    }

    pub fn is_ready(&self, vm: Vm) -> bool {
        matches!(self.vms.get(&vm), Some(VmState::Ready))
    }

    pub fn is_running(&self, vm: Vm) -> bool {
        matches!(self.vms.get(&vm), Some(VmState::Running(_)))
    }

    pub fn is_sleeping(&self, vm: Vm) -> bool {
        matches!(self.vms.get(&vm), Some(VmState::Sleeping(_)))
    }

    pub fn is_online(&self, n: Node) -> bool {
        self.online.contains(&n)
    }

    pub fn is_offline(&self, n: Node) -> bool {
        self.offline.contains(&n)
    }

    pub fn contains_vm(&self, vm: Vm) -> bool {
        self.vms.contains_key(&vm)
    }

    pub fn contains_node(&self, n: Node) -> bool {
        self.online.contains(&n) || self.offline.contains(&n)
    }

    /// Remove every VM and node.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn ensure_online(&self, n: Node) -> ModelResult<()> {
        if self.online.contains(&n) {
            Ok(())
        } else if self.offline.contains(&n) {
            Err(ModelError::NodeOffline(n))
        } else {
            Err(ModelError::UnknownNode(n))
        }
    }

    fn hosted_count(&self, n: Node) -> usize {
        self.running.get(&n).map_or(0, BTreeSet::len) + self.sleeping.get(&n).map_or(0, BTreeSet::len)
    }

    /// Drop a VM from the per-node indexes. Empty index entries are removed
    /// so that structural equality only depends on the placement.
    fn detach(&mut self, vm: Vm) {
        let (index, n) = match self.vms.get(&vm) {
            Some(VmState::Running(n)) => (&mut self.running, *n),
            Some(VmState::Sleeping(n)) => (&mut self.sleeping, *n),
            Some(VmState::Ready) | None => return,
        };
        if let Some(s) = index.get_mut(&n) {
            s.remove(&vm);
            if s.is_empty() {
                index.remove(&n);
            }
        }
    }

    fn vms_in(&self, pred: impl Fn(&VmState) -> bool) -> BTreeSet<Vm> {
        self.vms
            .iter()
            .filter(|(_, s)| pred(s))
            .map(|(v, _)| *v)
            .collect()
    }
}

impl TryFrom<MappingRecord> for Mapping {
    type Error = ModelError;

    fn try_from(r: MappingRecord) -> ModelResult<Self> {
        let mut m = Mapping::new();
        for n in r.online {
            m.add_online_node(n);
        }
        for n in r.offline {
            if m.is_online(n) {
                return Err(ModelError::InconsistentMapping(format!(
                    "{n} is both online and offline"
                )));
            }
            m.add_offline_node(n)?;
        }
        for (vm, state) in r.vms {
            match state {
                VmState::Ready => m.add_ready_vm(vm),
                VmState::Running(n) => m.add_running_vm(vm, n)?,
                VmState::Sleeping(n) => m.add_sleeping_vm(vm, n)?,
            }
        }
        Ok(m)
    }
}

impl From<Mapping> for MappingRecord {
    fn from(m: Mapping) -> Self {
        MappingRecord {
            online: m.online,
            offline: m.offline,
            vms: m.vms,
        }
    }
}

impl fmt::Display for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for n in &self.online {
            write!(f, "{n}:")?;
            let running = self.running_vms_on(*n);
            let sleeping = self.sleeping_vms_on(*n);
            if running.is_empty() && sleeping.is_empty() {
                write!(f, " -")?;
            }
            for v in running {
                write!(f, " {v}")?;
            }
            for v in sleeping {
                write!(f, " ({v})")?;
            }
            writeln!(f)?;
        }
        for n in &self.offline {
            writeln!(f, "({n})")?;
        }
        let ready = self.ready_vms();
        write!(f, "READY")?;
        for v in ready {
            write!(f, " {v}")?;
        }
        Ok(())
    }
}
