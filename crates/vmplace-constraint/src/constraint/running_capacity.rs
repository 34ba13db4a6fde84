//! RunningCapacity: at most a given number of VMs run on a set of nodes,
//! all nodes together.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vmplace_core::{Model, Node, Vm};
use vmplace_plan::{Action, RunningVmPlacement};

use super::{Constraint, SatConstraint, list, restriction};
use crate::checker::{CheckerBase, SatConstraintChecker, Tracked};
use crate::error::ConstraintResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunningCapacity {
    nodes: BTreeSet<Node>,
    amount: usize,
    #[serde(default)]
    continuous: bool,
}

impl RunningCapacity {
    pub fn new(nodes: impl IntoIterator<Item = Node>, amount: usize) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
            amount,
            continuous: false,
        }
    }

    pub fn with_continuous(mut self, continuous: bool) -> Self {
        self.continuous = continuous;
        self
    }

    pub fn nodes(&self) -> &BTreeSet<Node> {
        &self.nodes
    }

    pub fn amount(&self) -> usize {
        self.amount
    }
}

impl SatConstraint for RunningCapacity {
    fn involved_vms(&self) -> BTreeSet<Vm> {
        BTreeSet::new()
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
        let mut base = CheckerBase::new(BTreeSet::new(), self.involved_nodes());
        let running = base.track(BTreeSet::new());
        Box::new(RunningCapacityChecker {
            cstr: self.clone(),
            base,
            running,
        })
    }
}

impl fmt::Display for RunningCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "running_capacity(nodes={}, amount={}, {})",
            list(&self.nodes),
            self.amount,
            restriction(self.continuous)
        )
    }
}

struct RunningCapacityChecker {
    cstr: RunningCapacity,
    base: CheckerBase,
    /// VMs counted as running on the node set.
    running: Tracked,
}

impl RunningCapacityChecker {
    fn fits(&self) -> bool {
        let count = self.base.tracked(self.running).len();
        if count > self.cstr.amount {
            debug!(count, amount = self.cstr.amount, "too many running vms");
            return false;
        }
        true
    }
}

impl SatConstraintChecker for RunningCapacityChecker {
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
        let running = mo.mapping().running_vms_on_any(self.base.nodes());
        *self.base.tracked_mut(self.running) = running;
        self.fits()
    }

    fn start_running_vm_placement(&mut self, _a: &Action, p: &RunningVmPlacement) -> bool {
        if !self.cstr.continuous || !self.base.nodes().contains(&p.dst) {
            return true;
        }
        self.base.tracked_mut(self.running).insert(p.vm);
        self.fits()
    }

    fn end(&mut self, a: &Action) {
        if !self.cstr.continuous {
            return;
        }
        let Some((vm, src)) = a.kind().running_vm_departure() else {
            return;
        };
        let stays = a
            .kind()
            .running_vm_placement()
            .is_some_and(|p| self.base.nodes().contains(&p.dst));
        if !stays && self.base.nodes().contains(&src) {
            self.base.tracked_mut(self.running).remove(&vm);
        }
    }

    fn ends_with(&mut self, mo: &Model) -> bool {
        mo.mapping().running_vms_on_any(self.base.nodes()).len() <= self.cstr.amount
    }
}
