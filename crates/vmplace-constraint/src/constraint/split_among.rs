//! SplitAmong: every VM group runs inside one node group, and no two VM
//! groups share a node group.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vmplace_core::{Mapping, Model, Node, Vm};
use vmplace_plan::{Action, RunningVmPlacement};

use super::{Constraint, SatConstraint, ensure_partition, group_of, list_of_lists, restriction};
use crate::checker::{CheckerBase, SatConstraintChecker, Tracked};
use crate::error::ConstraintResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SplitAmong {
    vm_groups: Vec<BTreeSet<Vm>>,
    node_groups: Vec<BTreeSet<Node>>,
    #[serde(default)]
    continuous: bool,
}

impl SplitAmong {
    pub fn new(vm_groups: Vec<BTreeSet<Vm>>, node_groups: Vec<BTreeSet<Node>>) -> ConstraintResult<Self> {
        let c = Self {
            vm_groups,
            node_groups,
            continuous: false,
        };
        c.validate()?;
        Ok(c)
    }

    pub fn with_continuous(mut self, continuous: bool) -> Self {
        self.continuous = continuous;
        self
    }

    pub fn validate(&self) -> ConstraintResult<()> {
        ensure_partition("split_among", &self.vm_groups)?;
        ensure_partition("split_among", &self.node_groups)
    }

    pub fn vm_groups(&self) -> &[BTreeSet<Vm>] {
        &self.vm_groups
    }

    pub fn node_groups(&self) -> &[BTreeSet<Node>] {
        &self.node_groups
    }
}

impl SatConstraint for SplitAmong {
    fn involved_vms(&self) -> BTreeSet<Vm> {
        self.vm_groups.iter().flatten().copied().collect()
    }

    fn involved_nodes(&self) -> BTreeSet<Node> {
        self.node_groups.iter().flatten().copied().collect()
    }

    fn is_continuous(&self) -> bool {
        self.continuous
    }

    fn set_continuous(&mut self, continuous: bool) -> ConstraintResult<()> {
        self.continuous = continuous;
        Ok(())
    }

    fn checker(&self) -> Box<dyn SatConstraintChecker> {
        let mut base = CheckerBase::new(self.involved_vms(), self.involved_nodes());
        let vm_groups = self.vm_groups.iter().map(|g| base.track(g.clone())).collect();
        Box::new(SplitAmongChecker {
            cstr: self.clone(),
            base,
            vm_groups,
            mock: Mapping::new(),
            leaving: BTreeMap::new(),
        })
    }
}

impl fmt::Display for SplitAmong {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "split_among(vms={}, nodes={}, {})",
            list_of_lists(&self.vm_groups),
            list_of_lists(&self.node_groups),
            restriction(self.continuous)
        )
    }
}

struct SplitAmongChecker {
    cstr: SplitAmong,
    base: CheckerBase,
    vm_groups: Vec<Tracked>,
    mock: Mapping,
    /// VMs still running on their source node until their move ends.
    leaving: BTreeMap<Vm, Node>,
}

impl SplitAmongChecker {
    fn vm_group_of(&self, vm: Vm) -> Option<usize> {
        self.vm_groups.iter().position(|t| self.base.tracked(*t).contains(&vm))
    }

    fn node_group_of(&self, n: Node) -> Option<usize> {
        group_of(&self.cstr.node_groups, &n)
    }

    /// Node groups used by the running VMs of a VM group, skipping `except`.
    /// A VM being moved away still uses the node group of its source.
    /// `None` when one of them runs outside every node group.
    fn used_node_groups(&self, map: &Mapping, g: usize, except: Option<Vm>) -> Option<BTreeSet<usize>> {
        let mut used = BTreeSet::new();
        for vm in self.base.tracked(self.vm_groups[g]) {
            if Some(*vm) == except || !map.is_running(*vm) {
                continue;
            }
            let n = map.vm_location(*vm)?;
            used.insert(self.node_group_of(n)?);
            if let Some(src) = self.leaving.get(vm) {
                used.insert(self.node_group_of(*src)?);
            }
        }
        Some(used)
    }

    fn check(&self, map: &Mapping) -> bool {
        let mut owner: BTreeMap<usize, usize> = BTreeMap::new();
        for g in 0..self.vm_groups.len() {
            let Some(used) = self.used_node_groups(map, g, None) else {
                debug!(group = g, "vm running outside every node group");
                return false;
            };
            if used.len() > 1 {
                debug!(group = g, "vm group spans several node groups");
                return false;
            }
            for ng in used {
                if *owner.entry(ng).or_insert(g) != g {
                    debug!(node_group = ng, "node group shared by two vm groups");
                    return false;
                }
            }
        }
        true
    }
}

impl SatConstraintChecker for SplitAmongChecker {
    fn constraint(&self) -> Constraint {
        self.cstr.clone().into()
    }

    fn base(&self) -> &CheckerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CheckerBase {
        &mut self.base
    }

    fn starts_with(&mut self, mo: &Model) -> bool {
        if !self.cstr.continuous {
            return true;
        }
        self.mock = mo.mapping().clone();
        self.check(mo.mapping())
    }

    fn start_running_vm_placement(&mut self, _a: &Action, p: &RunningVmPlacement) -> bool {
        if !self.cstr.continuous {
            return true;
        }
        let Some(g) = self.vm_group_of(p.vm) else {
            return true;
        };
        let Some(ng) = self.node_group_of(p.dst) else {
            debug!(vm = %p.vm, node = %p.dst, "destination outside every node group");
            return false;
        };
        match self.used_node_groups(&self.mock, g, Some(p.vm)) {
            Some(used) if used.iter().all(|u| *u == ng) => {}
            _ => {
                debug!(vm = %p.vm, node = %p.dst, "vm group would span two node groups");
                return false;
            }
        }
        let collides = (0..self.vm_groups.len())
            .filter(|o| *o != g)
            .any(|o| self.used_node_groups(&self.mock, o, None).is_none_or(|u| u.contains(&ng)));
        if collides {
            debug!(vm = %p.vm, node = %p.dst, "node group used by another vm group");
            return false;
        }
        if let Some(src) = p.src.filter(|_| self.mock.is_running(p.vm)) {
            self.leaving.insert(p.vm, src);
        }
        self.mock.add_online_node(p.dst);
        if let Err(e) = self.mock.add_running_vm(p.vm, p.dst) {
            debug!(error = %e, "mock placement failed");
        }
        true
    }

    fn end(&mut self, a: &Action) {
        if !self.cstr.continuous {
            return;
        }
        if a.kind().running_vm_placement().is_some() {
            if let Some(vm) = a.kind().vm() {
                self.leaving.remove(&vm);
            }
            return;
        }
        if let Some((vm, _)) = a.kind().running_vm_departure() {
            self.mock.add_ready_vm(vm);
        }
    }

    fn substitute_vm(&mut self, old: Vm, new: Vm) {
        self.base.substitute_vm(old, new);
        if self.mock.contains_vm(old) {
            if let Err(e) = self.mock.substitute_vm(old, new) {
                debug!(error = %e, "mock substitution failed");
            }
        }
        if let Some(src) = self.leaving.remove(&old) {
            self.leaving.insert(new, src);
        }
    }

    fn ends_with(&mut self, mo: &Model) -> bool {
        self.check(mo.mapping())
    }
}
