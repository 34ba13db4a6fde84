//! Fence: a VM may only run on a set of nodes.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vmplace_core::{Model, Node, Vm};
use vmplace_plan::{Action, RunningVmPlacement};

use super::{Constraint, SatConstraint, list, restriction};
use crate::checker::{CheckerBase, SatConstraintChecker};
use crate::error::ConstraintResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fence {
    vm: Vm,
    nodes: BTreeSet<Node>,
    #[serde(default)]
    continuous: bool,
}

impl Fence {
    pub fn new(vm: Vm, nodes: impl IntoIterator<Item = Node>) -> Self {
        Self {
            vm,
            nodes: nodes.into_iter().collect(),
            continuous: false,
        }
    }

    pub fn with_continuous(mut self, continuous: bool) -> Self {
        self.continuous = continuous;
        self
    }

    pub fn vm(&self) -> Vm {
        self.vm
    }

    pub fn nodes(&self) -> &BTreeSet<Node> {
        &self.nodes
    }
}

impl SatConstraint for Fence {
    fn involved_vms(&self) -> BTreeSet<Vm> {
        BTreeSet::from([self.vm])
    }

    fn involved_nodes(&self) -> BTreeSet<Node> {
        self.nodes.clone()
    }

    fn is_continuous(&self) -> bool {
        self.continuous
    }

    fn set_continuous(&mut self, continuous: bool) -> ConstraintResult<()> {
        self.continuous = continuous;
        Ok(())
    }

    fn checker(&self) -> Box<dyn SatConstraintChecker> {
        Box::new(FenceChecker {
            cstr: self.clone(),
            base: CheckerBase::new(self.involved_vms(), self.involved_nodes()),
        })
    }
}

impl fmt::Display for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fence(vm={}, nodes={}, {})",
            self.vm,
            list(&self.nodes),
            restriction(self.continuous)
        )
    }
}

struct FenceChecker {
    cstr: Fence,
    base: CheckerBase,
}

impl FenceChecker {
    fn check(&self, mo: &Model) -> bool {
        self.base.vms().iter().all(|vm| match mo.mapping().vm_location(*vm) {
            Some(n) if mo.mapping().is_running(*vm) => self.base.nodes().contains(&n),
            _ => true,
        })
    }
}

impl SatConstraintChecker for FenceChecker {
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
        !self.cstr.continuous || self.check(mo)
    }

    fn start_running_vm_placement(&mut self, _a: &Action, p: &RunningVmPlacement) -> bool {
        if self.cstr.continuous && self.base.watches(p.vm) && !self.base.nodes().contains(&p.dst) {
            debug!(vm = %p.vm, node = %p.dst, "placement outside the fence");
            return false;
        }
        true
    }

    fn ends_with(&mut self, mo: &Model) -> bool {
        self.check(mo)
    }
}
