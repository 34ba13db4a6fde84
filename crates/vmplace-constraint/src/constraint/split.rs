//! Split: VMs of distinct groups never share a host.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vmplace_core::{Mapping, Model, Node, Vm};
use vmplace_plan::{Action, RunningVmPlacement};

use super::{Constraint, SatConstraint, ensure_partition, list_of_lists, restriction};
use crate::checker::{CheckerBase, SatConstraintChecker, Tracked};
use crate::error::ConstraintResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Split {
    groups: Vec<BTreeSet<Vm>>,
    #[serde(default)]
    continuous: bool,
}

impl Split {
    pub fn new(groups: Vec<BTreeSet<Vm>>) -> ConstraintResult<Self> {
        let c = Self {
            groups,
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
        ensure_partition("split", &self.groups)
    }

    pub fn groups(&self) -> &[BTreeSet<Vm>] {
        &self.groups
    }
}

impl SatConstraint for Split {
    fn involved_vms(&self) -> BTreeSet<Vm> {
        self.groups.iter().flatten().copied().collect()
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
        let mut base = CheckerBase::new(self.involved_vms(), BTreeSet::new());
        let groups = self.groups.iter().map(|g| base.track(g.clone())).collect();
        Box::new(SplitChecker {
            cstr: self.clone(),
            base,
            groups,
            mock: Mapping::new(),
            leaving: BTreeMap::new(),
        })
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "split(vms={}, {})",
            list_of_lists(&self.groups),
            restriction(self.continuous)
        )
    }
}

struct SplitChecker {
    cstr: Split,
    base: CheckerBase,
    groups: Vec<Tracked>,
    /// Running placements as the checker sees them: arrivals are recorded
    /// at the start of their action.
    mock: Mapping,
    /// VMs still running on their source node until their move ends.
    leaving: BTreeMap<Vm, Node>,
}

impl SplitChecker {
    fn group_of(&self, vm: Vm) -> Option<usize> {
        self.groups.iter().position(|t| self.base.tracked(*t).contains(&vm))
    }

    /// Whether a VM of another group than `g` is on `n`.
    fn hosts_other_group(&self, g: usize, n: Node) -> bool {
        let present = self
            .mock
            .running_vms_on(n)
            .into_iter()
            .chain(self.leaving.iter().filter(|(_, src)| **src == n).map(|(vm, _)| *vm));
        for vm in present {
            if self.group_of(vm).is_some_and(|o| o != g) {
                return true;
            }
        }
        false
    }

    fn check(&self, map: &Mapping) -> bool {
        let mut owner: BTreeMap<Node, usize> = BTreeMap::new();
        for (g, t) in self.groups.iter().enumerate() {
            for vm in self.base.tracked(*t) {
                let Some(n) = map.vm_location(*vm).filter(|_| map.is_running(*vm)) else {
                    continue;
                };
                if *owner.entry(n).or_insert(g) != g {
                    debug!(node = %n, "node shared by two groups");
                    return false;
                }
            }
        }
        true
    }
}

impl SatConstraintChecker for SplitChecker {
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
        let Some(g) = self.group_of(p.vm) else {
            return true;
        };
        if self.hosts_other_group(g, p.dst) {
            debug!(vm = %p.vm, node = %p.dst, "destination hosts another group");
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

    /// Groups {v1, v2} on n1 and {v3} on n2; n3 empty.
    fn make_model() -> Model {
        let mut mo = Model::new();
        let map = mo.mapping_mut();
        for i in 1..=3 {
            map.add_online_node(n(i));
        }
        map.add_running_vm(v(1), n(1)).unwrap();
        map.add_running_vm(v(2), n(1)).unwrap();
        map.add_running_vm(v(3), n(2)).unwrap();
        mo
    }

    fn make_split() -> Split {
        Split::new(vec![BTreeSet::from([v(1), v(2)]), BTreeSet::from([v(3)])]).unwrap()
    }

    #[test]
    fn groups_must_be_disjoint() {
        assert!(Split::new(vec![BTreeSet::from([v(1)]), BTreeSet::from([v(1), v(2)])]).is_err());
    }

    #[test]
    fn model_checks() {
        let mut mo = make_model();
        assert!(make_split().is_satisfied(&mo));
        mo.mapping_mut().add_running_vm(v(3), n(1)).unwrap();
        assert!(!make_split().is_satisfied(&mo));
    }

    #[test]
    fn continuous_waits_for_the_node_to_be_left() {
        // v3 reaches n1 while v1 and v2 are still leaving it
        let mut p = ReconfigurationPlan::new(make_model());
        p.add(Action::migrate(v(1), n(1), n(3), 0, 3)).unwrap();
        p.add(Action::migrate(v(2), n(1), n(3), 0, 3)).unwrap();
        p.add(Action::migrate(v(3), n(2), n(1), 1, 4)).unwrap();
        assert!(make_split().is_satisfied_by(&p));
        assert!(!make_split().with_continuous(true).is_satisfied_by(&p));

        let mut p = ReconfigurationPlan::new(make_model());
        p.add(Action::migrate(v(1), n(1), n(3), 0, 3)).unwrap();
        p.add(Action::migrate(v(2), n(1), n(3), 0, 3)).unwrap();
        p.add(Action::migrate(v(3), n(2), n(1), 3, 4)).unwrap();
        assert!(make_split().with_continuous(true).is_satisfied_by(&p));
    }

    #[test]
    fn shutdown_frees_the_node() {
        let mut p = ReconfigurationPlan::new(make_model());
        p.add(Action::shutdown_vm(v(3), n(2), 0, 1)).unwrap();
        p.add(Action::migrate(v(1), n(1), n(2), 1, 2)).unwrap();
        assert!(make_split().with_continuous(true).is_satisfied_by(&p));
    }

    #[test]
    fn display() {
        assert_eq!(
            make_split().to_string(),
            "split(vms=[[vm#1, vm#2], [vm#3]], discrete)"
        );
    }
}
