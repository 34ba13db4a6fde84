//! Seq: the state transitions of a list of VMs happen one at a time, in
//! the list order.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vmplace_core::{Node, Vm};
use vmplace_plan::{Action, ActionKind};

use super::{Constraint, SatConstraint, continuous_only, list};
use crate::checker::{CheckerBase, SatConstraintChecker};
use crate::error::{ConstraintError, ConstraintResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Seq {
    order: Vec<Vm>,
}

impl Seq {
    pub fn new(order: Vec<Vm>) -> ConstraintResult<Self> {
        let c = Self { order };
        c.validate()?;
        Ok(c)
    }

    /// A VM appears at most once in the order.
    pub fn validate(&self) -> ConstraintResult<()> {
        let mut seen = BTreeSet::new();
        for vm in &self.order {
            if !seen.insert(*vm) {
                return Err(ConstraintError::DuplicateElement {
                    constraint: "seq",
                    element: vm.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn order(&self) -> &[Vm] {
        &self.order
    }
}

impl SatConstraint for Seq {
    fn involved_vms(&self) -> BTreeSet<Vm> {
        self.order.iter().copied().collect()
    }

    fn involved_nodes(&self) -> BTreeSet<Node> {
        BTreeSet::new()
    }

    fn is_continuous(&self) -> bool {
        true
    }

    fn set_continuous(&mut self, continuous: bool) -> ConstraintResult<()> {
        continuous_only("seq", continuous)
    }

    fn checker(&self) -> Box<dyn SatConstraintChecker> {
        Box::new(SeqChecker {
            cstr: self.clone(),
            base: CheckerBase::new(self.involved_vms(), BTreeSet::new()),
            remaining: self.order.iter().copied().collect(),
            pending: None,
        })
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq(vms={}, continuous)", list(&self.order))
    }
}

struct SeqChecker {
    cstr: Seq,
    base: CheckerBase,
    remaining: VecDeque<Vm>,
    pending: Option<Vm>,
}

fn is_transition(kind: &ActionKind) -> bool {
    matches!(
        kind,
        ActionKind::BootVm { .. }
            | ActionKind::ShutdownVm { .. }
            | ActionKind::SuspendVm { .. }
            | ActionKind::ResumeVm { .. }
            | ActionKind::KillVm { .. }
    )
}

impl SatConstraintChecker for SeqChecker {
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
        let Some(vm) = a.kind().vm().filter(|vm| self.base.watches(*vm)) else {
            return true;
        };
        if !is_transition(a.kind()) {
            return true;
        }
        if let Some(p) = self.pending {
            debug!(vm = %vm, pending = %p, "another transition is in progress");
            return false;
        }
        while let Some(next) = self.remaining.pop_front() {
            if next == vm {
                self.pending = Some(vm);
                return true;
            }
        }
        debug!(vm = %vm, "transition out of order");
        false
    }

    fn end(&mut self, a: &Action) {
        if a.kind().vm().is_some_and(|vm| self.pending == Some(vm)) {
            self.pending = None;
        }
    }

    fn substitute_vm(&mut self, old: Vm, new: Vm) {
        self.base.substitute_vm(old, new);
        for vm in self.remaining.iter_mut().filter(|vm| **vm == old) {
            *vm = new;
        }
        if self.pending == Some(old) {
            self.pending = Some(new);
        }
    }
}
