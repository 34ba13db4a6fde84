//! Lonely: the watched VMs never share a host with other VMs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vmplace_core::{Model, Node, Vm};
use vmplace_plan::{Action, ActionKind, RunningVmPlacement};

use super::{Constraint, SatConstraint, list, restriction};
use crate::checker::{CheckerBase, SatConstraintChecker};
use crate::error::ConstraintResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lonely {
    vms: BTreeSet<Vm>,
    #[serde(default)]
    continuous: bool,
}

impl Lonely {
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

impl SatConstraint for Lonely {
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
        Box::new(LonelyChecker {
            cstr: self.clone(),
            base: CheckerBase::new(self.involved_vms(), BTreeSet::new()),
            occupants: BTreeMap::new(),
        })
    }
}

impl fmt::Display for Lonely {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lonely(vms={}, {})", list(&self.vms), restriction(self.continuous))
    }
}

/// Tracks the VMs occupying each node while the plan runs. An arriving VM
/// occupies its destination from the start of its action, a leaving one
/// holds its source until the action ends. A node without occupants is
/// idle; an occupied node is private when all its occupants are watched.
struct LonelyChecker {
    cstr: Lonely,
    base: CheckerBase,
    occupants: BTreeMap<Node, BTreeSet<Vm>>,
}

impl LonelyChecker {
    fn is_private(&self, n: Node) -> bool {
        self.occupants
            .get(&n)
            .is_some_and(|o| !o.is_empty() && o.iter().all(|vm| self.base.watches(*vm)))
    }

    fn is_idle(&self, n: Node) -> bool {
        self.occupants.get(&n).is_none_or(BTreeSet::is_empty)
    }

    fn check(&self, mo: &Model) -> bool {
        let map = mo.mapping();
        self.base
            .vms()
            .iter()
            .filter(|vm| map.is_running(**vm))
            .filter_map(|vm| map.vm_location(*vm))
            .all(|n| map.running_vms_on(n).iter().all(|o| self.base.watches(*o)))
    }
}

impl SatConstraintChecker for LonelyChecker {
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
        self.occupants = map
            .online_nodes()
            .iter()
            .map(|n| (*n, map.running_vms_on(*n)))
            .collect();
        self.check(mo)
    }

    fn start(&mut self, a: &Action) -> bool {
        if !self.cstr.continuous {
            return true;
        }
        match a.kind() {
            ActionKind::BootNode { node } => {
                self.occupants.remove(node);
                true
            }
            kind => match kind.running_vm_placement() {
                Some(p) => self.start_running_vm_placement(a, &p),
                None => true,
            },
        }
    }

    fn start_running_vm_placement(&mut self, _a: &Action, p: &RunningVmPlacement) -> bool {
        let accepted = if self.base.watches(p.vm) {
            self.is_idle(p.dst) || self.is_private(p.dst)
        } else {
            !self.is_private(p.dst)
        };
        if !accepted {
            debug!(vm = %p.vm, node = %p.dst, "placement breaks isolation");
            return false;
        }
        self.occupants.entry(p.dst).or_default().insert(p.vm);
        true
    }

    fn end(&mut self, a: &Action) {
        if !self.cstr.continuous {
            return;
        }
        let dst = a.kind().running_vm_placement().map(|p| p.dst);
        if let Some((vm, src)) = a.kind().running_vm_departure() {
            if dst != Some(src) {
                if let Some(o) = self.occupants.get_mut(&src) {
                    o.remove(&vm);
                }
            }
        }
    }

    fn substitute_vm(&mut self, old: Vm, new: Vm) {
        self.base.substitute_vm(old, new);
        for o in self.occupants.values_mut() {
            if o.remove(&old) {
                o.insert(new);
            }
        }
    }

    fn ends_with(&mut self, mo: &Model) -> bool {
        self.check(mo)
    }
}
