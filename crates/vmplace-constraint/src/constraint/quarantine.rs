//! Quarantine: a set of nodes is isolated while the plan runs.
//!
//! The VMs already running in the zone stay on their node and no other VM
//! may enter it.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vmplace_core::{Model, Node, Vm};
use vmplace_plan::{Action, ActionKind, RunningVmPlacement};

use super::{Constraint, SatConstraint, continuous_only, list};
use crate::checker::{CheckerBase, SatConstraintChecker};
use crate::error::ConstraintResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quarantine {
    nodes: BTreeSet<Node>,
}

impl Quarantine {
    pub fn new(nodes: impl IntoIterator<Item = Node>) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
        }
    }

    pub fn nodes(&self) -> &BTreeSet<Node> {
        &self.nodes
    }
}

impl SatConstraint for Quarantine {
    fn involved_vms(&self) -> BTreeSet<Vm> {
        BTreeSet::new()
    }

    fn involved_nodes(&self) -> BTreeSet<Node> {
        self.nodes.clone()
    }

    fn is_continuous(&self) -> bool {
        true
    }

    fn set_continuous(&mut self, continuous: bool) -> ConstraintResult<()> {
        continuous_only("quarantine", continuous)
    }

    fn checker(&self) -> Box<dyn SatConstraintChecker> {
        Box::new(QuarantineChecker {
            cstr: self.clone(),
            base: CheckerBase::new(BTreeSet::new(), self.involved_nodes()),
        })
    }
}

impl fmt::Display for Quarantine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "quarantine(nodes={}, continuous)", list(&self.nodes))
    }
}

struct QuarantineChecker {
    cstr: Quarantine,
    base: CheckerBase,
}

impl SatConstraintChecker for QuarantineChecker {
    fn constraint(&self) -> Constraint {
        self.cstr.clone().into()
    }

    fn base(&self) -> &CheckerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CheckerBase {
        &mut self.base
    }

    /// The watched VMs are the ones running in the zone at the origin.
    fn starts_with(&mut self, mo: &Model) -> bool {
        let inside = mo.mapping().running_vms_on_any(self.base.nodes());
        *self.base.vms_mut() = inside;
        true
    }

    fn start_running_vm_placement(&mut self, a: &Action, p: &RunningVmPlacement) -> bool {
        if self.base.watches(p.vm) {
            if matches!(a.kind(), ActionKind::MigrateVm { .. }) {
                debug!(vm = %p.vm, node = %p.dst, "quarantined vm moved");
                return false;
            }
            return true;
        }
        if self.base.nodes().contains(&p.dst) {
            debug!(vm = %p.vm, node = %p.dst, "vm entered the zone");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmplace_plan::ReconfigurationPlan;

    fn n(i: u32) -> Node {
        Node::new(i)
    }

    fn v(i: u32) -> Vm {
        Vm::new(i)
    }

    /// Zone {n1, n2} hosts v1; v2 runs on n3; v3 is ready.
    fn make_model() -> Model {
        let mut mo = Model::new();
        let map = mo.mapping_mut();
        for i in 1..=4 {
            map.add_online_node(n(i));
        }
        map.add_running_vm(v(1), n(1)).unwrap();
        map.add_running_vm(v(2), n(3)).unwrap();
        map.add_ready_vm(v(3));
        mo
    }

    fn check(actions: Vec<Action>) -> bool {
        let mut p = ReconfigurationPlan::new(make_model());
        for a in actions {
            p.add(a).unwrap();
        }
        Quarantine::new([n(1), n(2)]).is_satisfied_by(&p)
    }

    #[test]
    fn quarantined_vms_stay_on_their_node() {
        assert!(!check(vec![Action::migrate(v(1), n(1), n(2), 0, 3)]));
        assert!(check(vec![Action::migrate(v(2), n(3), n(4), 0, 1)]));
    }

    #[test]
    fn crossing_the_zone_is_rejected() {
        assert!(!check(vec![Action::migrate(v(1), n(1), n(3), 0, 1)]));
        assert!(!check(vec![Action::migrate(v(2), n(3), n(2), 0, 1)]));
        assert!(!check(vec![Action::boot_vm(v(3), n(2), 0, 1)]));
        assert!(check(vec![Action::boot_vm(v(3), n(4), 0, 1)]));
    }
}
