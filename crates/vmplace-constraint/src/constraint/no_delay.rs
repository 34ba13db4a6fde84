//! NoDelay: every action on a VM starts at the very beginning of the plan.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vmplace_core::{Node, Vm};
use vmplace_plan::Action;

use super::{Constraint, SatConstraint, continuous_only};
use crate::checker::{CheckerBase, SatConstraintChecker, touches_my_vms};
use crate::error::ConstraintResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoDelay {
    vm: Vm,
}

impl NoDelay {
    pub fn new(vm: Vm) -> Self {
        Self { vm }
    }

    pub fn vm(&self) -> Vm {
        self.vm
    }
}

impl SatConstraint for NoDelay {
    fn involved_vms(&self) -> BTreeSet<Vm> {
        BTreeSet::from([self.vm])
    }

    fn involved_nodes(&self) -> BTreeSet<Node> {
        BTreeSet::new()
    }

    fn is_continuous(&self) -> bool {
        true
    }

    fn set_continuous(&mut self, continuous: bool) -> ConstraintResult<()> {
        continuous_only("no_delay", continuous)
    }

    fn checker(&self) -> Box<dyn SatConstraintChecker> {
        Box::new(NoDelayChecker {
            cstr: self.clone(),
            base: CheckerBase::new(self.involved_vms(), BTreeSet::new()),
        })
    }
}

impl fmt::Display for NoDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no_delay(vm={}, continuous)", self.vm)
    }
}

struct NoDelayChecker {
    cstr: NoDelay,
    base: CheckerBase,
}

impl SatConstraintChecker for NoDelayChecker {
    fn constraint(&self) -> Constraint {
        self.cstr.clone().into()
    }

    fn base(&self) -> &CheckerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CheckerBase {
        &mut self.base
    }

    fn start(&mut self, a: &Action) -> bool {
        if touches_my_vms(&self.base, a) && a.start() != 0 {
            debug!(action = %a, start = a.start(), "delayed action");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmplace_core::Model;
    use vmplace_plan::ReconfigurationPlan;

    fn make_model() -> Model {
        let mut mo = Model::new();
        let map = mo.mapping_mut();
        map.add_online_node(Node::new(1));
        map.add_ready_vm(Vm::new(1));
        map.add_ready_vm(Vm::new(2));
        mo
    }

    #[test]
    fn actions_must_start_at_zero() {
        let mut p = ReconfigurationPlan::new(make_model());
        p.add(Action::boot_vm(Vm::new(1), Node::new(1), 0, 3)).unwrap();
        p.add(Action::boot_vm(Vm::new(2), Node::new(1), 2, 3)).unwrap();
        assert!(NoDelay::new(Vm::new(1)).is_satisfied_by(&p));
        assert!(!NoDelay::new(Vm::new(2)).is_satisfied_by(&p));
        assert_eq!(NoDelay::new(Vm::new(2)).to_string(), "no_delay(vm=vm#2, continuous)");
    }
}
