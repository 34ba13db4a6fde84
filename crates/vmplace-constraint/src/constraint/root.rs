//! Root: a VM stays on its host while the plan runs.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vmplace_core::{Node, Vm};
use vmplace_plan::{Action, ActionKind};

use super::{Constraint, SatConstraint, continuous_only};
use crate::checker::{CheckerBase, SatConstraintChecker};
use crate::error::ConstraintResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Root {
    vm: Vm,
}

impl Root {
    pub fn new(vm: Vm) -> Self {
        Self { vm }
    }

    pub fn vm(&self) -> Vm {
        self.vm
    }
}

impl SatConstraint for Root {
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
        continuous_only("root", continuous)
    }

    fn checker(&self) -> Box<dyn SatConstraintChecker> {
        Box::new(RootChecker {
            cstr: self.clone(),
            base: CheckerBase::new(self.involved_vms(), BTreeSet::new()),
        })
    }
}

impl fmt::Display for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "root(vm={}, continuous)", self.vm)
    }
}

struct RootChecker {
    cstr: Root,
    base: CheckerBase,
}

impl SatConstraintChecker for RootChecker {
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
        match a.kind() {
            ActionKind::MigrateVm { vm, .. } if self.base.watches(*vm) => {
                debug!(vm = %vm, "rooted vm migrated");
                false
            }
            _ => true,
        }
    }
}
