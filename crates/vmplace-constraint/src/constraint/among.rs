//! Among: a set of VMs must run inside a single group of nodes.
//!
//! The groups form a partition. In continuous mode the VMs are bound to the
//! group they first run on and may never reach another one; in discrete mode
//! they may switch groups as long as they all end in the same one.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vmplace_core::{Model, Node, Vm};
use vmplace_plan::{Action, RunningVmPlacement};

use super::{Constraint, SatConstraint, ensure_partition, group_of, list, list_of_lists, restriction};
use crate::checker::{CheckerBase, SatConstraintChecker};
use crate::error::ConstraintResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Among {
    vms: BTreeSet<Vm>,
    groups: Vec<BTreeSet<Node>>,
    #[serde(default)]
    continuous: bool,
}

impl Among {
    pub fn new(vms: impl IntoIterator<Item = Vm>, groups: Vec<BTreeSet<Node>>) -> ConstraintResult<Self> {
        let c = Self {
            vms: vms.into_iter().collect(),
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
        ensure_partition("among", &self.groups)
    }

    pub fn vms(&self) -> &BTreeSet<Vm> {
        &self.vms
    }

    pub fn groups(&self) -> &[BTreeSet<Node>] {
        &self.groups
    }
}

impl SatConstraint for Among {
    fn involved_vms(&self) -> BTreeSet<Vm> {
        self.vms.clone()
    }

    fn involved_nodes(&self) -> BTreeSet<Node> {
        self.groups.iter().flatten().copied().collect()
    }

    fn is_continuous(&self) -> bool {
        self.continuous
    }

    fn set_continuous(&mut self, continuous: bool) -> ConstraintResult<()> {
        self.continuous = continuous;
        Ok(())
    }

    fn checker(&self) -> Box<dyn SatConstraintChecker> {
        Box::new(AmongChecker {
            cstr: self.clone(),
            base: CheckerBase::new(self.involved_vms(), self.involved_nodes()),
            selected: None,
        })
    }
}

impl fmt::Display for Among {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "among(vms={}, nodes={}, {})",
            list(&self.vms),
            list_of_lists(&self.groups),
            restriction(self.continuous)
        )
    }
}

struct AmongChecker {
    cstr: Among,
    base: CheckerBase,
    /// Index of the group the VMs are bound to.
    selected: Option<usize>,
}

impl AmongChecker {
    /// Bind to the group of `n`, or check it is the bound one.
    fn select(&mut self, n: Node) -> bool {
        let Some(g) = group_of(&self.cstr.groups, &n) else {
            debug!(node = %n, "node outside every group");
            return false;
        };
        match self.selected {
            Some(s) if s != g => {
                debug!(node = %n, selected = s, group = g, "group switch");
                false
            }
            Some(_) => true,
            None => {
                self.selected = Some(g);
                true
            }
        }
    }

    fn select_all(&mut self, mo: &Model) -> bool {
        self.selected = None;
        let hosts: Vec<Node> = self
            .base
            .vms()
            .iter()
            .filter(|vm| mo.mapping().is_running(**vm))
            .filter_map(|vm| mo.mapping().vm_location(*vm))
            .collect();
        hosts.into_iter().all(|n| self.select(n))
    }
}

impl SatConstraintChecker for AmongChecker {
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
        !self.cstr.continuous || self.select_all(mo)
    }

    fn start_running_vm_placement(&mut self, _a: &Action, p: &RunningVmPlacement) -> bool {
        if !self.cstr.continuous || !self.base.watches(p.vm) {
            return true;
        }
        self.select(p.dst)
    }

    fn ends_with(&mut self, mo: &Model) -> bool {
        self.select_all(mo)
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

    /// Groups {n1, n2} and {n3, n4}; v1 on n1, v2 on n2, v3 ready.
    fn make_model() -> Model {
        let mut mo = Model::new();
        let map = mo.mapping_mut();
        for i in 1..=5 {
            map.add_online_node(n(i));
        }
        map.add_running_vm(v(1), n(1)).unwrap();
        map.add_running_vm(v(2), n(2)).unwrap();
        map.add_ready_vm(v(3));
        mo
    }

    fn make_among() -> Among {
        Among::new(
            [v(1), v(2), v(3)],
            vec![BTreeSet::from([n(1), n(2)]), BTreeSet::from([n(3), n(4)])],
        )
        .unwrap()
    }

    #[test]
    fn overlapping_groups_are_refused() {
        let res = Among::new([v(1)], vec![BTreeSet::from([n(1)]), BTreeSet::from([n(1)])]);
        assert!(res.is_err());
    }

    #[test]
    fn model_checks() {
        let mut mo = make_model();
        assert!(make_among().is_satisfied(&mo));
        mo.mapping_mut().add_running_vm(v(3), n(3)).unwrap();
        assert!(!make_among().is_satisfied(&mo));
        mo.mapping_mut().add_running_vm(v(3), n(5)).unwrap();
        assert!(!make_among().is_satisfied(&mo));
    }

    #[test]
    fn discrete_allows_switching_group() {
        let mut p = ReconfigurationPlan::new(make_model());
        p.add(Action::migrate(v(1), n(1), n(3), 0, 2)).unwrap();
        p.add(Action::migrate(v(2), n(2), n(4), 0, 2)).unwrap();
        assert!(make_among().is_satisfied_by(&p));
        assert!(!make_among().with_continuous(true).is_satisfied_by(&p));
    }

    #[test]
    fn continuous_accepts_placements_in_the_bound_group() {
        let mut p = ReconfigurationPlan::new(make_model());
        p.add(Action::boot_vm(v(3), n(2), 0, 2)).unwrap();
        p.add(Action::migrate(v(1), n(1), n(2), 1, 3)).unwrap();
        assert!(make_among().with_continuous(true).is_satisfied_by(&p));
    }

    #[test]
    fn binding_happens_on_first_placement() {
        let mut mo = make_model();
        mo.mapping_mut().add_ready_vm(v(1));
        mo.mapping_mut().add_ready_vm(v(2));
        let mut p = ReconfigurationPlan::new(mo);
        p.add(Action::boot_vm(v(1), n(3), 0, 1)).unwrap();
        p.add(Action::boot_vm(v(2), n(1), 2, 3)).unwrap();
        assert!(!make_among().with_continuous(true).is_satisfied_by(&p));
    }

    #[test]
    fn display() {
        assert_eq!(
            make_among().to_string(),
            "among(vms=[vm#1, vm#2, vm#3], nodes=[[node#1, node#2], [node#3, node#4]], discrete)"
        );
    }
}
