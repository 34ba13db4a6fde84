//! Spread: the running VMs of a set are all on distinct hosts.
//!
//! In continuous mode a VM may only move onto a host once the watched VM
//! that was leaving it has completed its action.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vmplace_core::{Model, Node, Vm};
use vmplace_plan::{Action, RunningVmPlacement};

use super::{Constraint, SatConstraint, list, restriction};
use crate::checker::{CheckerBase, SatConstraintChecker};
use crate::error::ConstraintResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Spread {
    vms: BTreeSet<Vm>,
    #[serde(default)]
    continuous: bool,
}

impl Spread {
    pub fn new(vms: impl IntoIterator<Item = Vm>) -> Self {
        Self {
            vms: vms.into_iter().collect(),
            continuous: false,
        }
    }

    pub fn with_continuous(mut self, continuous: bool) -> Self {
        self.continuous = continuous;
        self
    }

    pub fn vms(&self) -> &BTreeSet<Vm> {
        &self.vms
    }
}

impl SatConstraint for Spread {
    fn involved_vms(&self) -> BTreeSet<Vm> {
        self.vms.clone()
    }

    fn involved_nodes(&self) -> BTreeSet<Node> {
        BTreeSet::new()
    }

    fn is_continuous(&self) -> bool {
        self.continuous
    }

    fn set_continuous(&mut self, continuous: bool) -> ConstraintResult<()> {
        self.continuous = continuous;
        Ok(())
    }

    fn checker(&self) -> Box<dyn SatConstraintChecker> {
        Box::new(SpreadChecker {
            cstr: self.clone(),
            base: CheckerBase::new(self.involved_vms(), BTreeSet::new()),
            denied: BTreeMap::new(),
        })
    }
}

impl fmt::Display for Spread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "spread(vms={}, {})", list(&self.vms), restriction(self.continuous))
    }
}

struct SpreadChecker {
    cstr: Spread,
    base: CheckerBase,
    /// Watched VMs holding each node. A node is denied while non-empty.
    denied: BTreeMap<Node, BTreeSet<Vm>>,
}

impl SpreadChecker {
    fn is_denied(&self, n: Node) -> bool {
        self.denied.get(&n).is_some_and(|vms| !vms.is_empty())
    }

    fn check(&self, mo: &Model) -> bool {
        let map = mo.mapping();
        let mut used = BTreeSet::new();
        self.base
            .vms()
            .iter()
            .filter(|vm| map.is_running(**vm))
            .filter_map(|vm| map.vm_location(*vm))
            .all(|n| used.insert(n))
    }
}

impl SatConstraintChecker for SpreadChecker {
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
        let map = mo.mapping();
        for vm in self.base.vms() {
            if let Some(n) = map.vm_location(*vm).filter(|_| map.is_running(*vm)) {
                self.denied.entry(n).or_default().insert(*vm);
            }
        }
        self.check(mo)
    }

    fn start_running_vm_placement(&mut self, _a: &Action, p: &RunningVmPlacement) -> bool {
        if !self.cstr.continuous || !self.base.watches(p.vm) {
            return true;
        }
        if self.is_denied(p.dst) {
            debug!(vm = %p.vm, node = %p.dst, "host already used by a watched vm");
            return false;
        }
        self.denied.entry(p.dst).or_default().insert(p.vm);
        true
    }

    fn end(&mut self, a: &Action) {
        if !self.cstr.continuous {
            return;
        }
        let dst = a.kind().running_vm_placement().map(|p| p.dst);
        if let Some((vm, src)) = a.kind().running_vm_departure() {
            if dst != Some(src) {
                if let Some(vms) = self.denied.get_mut(&src) {
                    vms.remove(&vm);
                }
            }
        }
    }

    fn substitute_vm(&mut self, old: Vm, new: Vm) {
        self.base.substitute_vm(old, new);
        for vms in self.denied.values_mut() {
            if vms.remove(&old) {
                vms.insert(new);
            }
        }
    }

    fn ends_with(&mut self, mo: &Model) -> bool {
        self.check(mo)
    }
}
