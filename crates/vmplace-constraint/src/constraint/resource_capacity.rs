//! ResourceCapacity: the VMs running on a set of nodes consume at most a
//! given amount of a resource, all nodes together.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vmplace_core::{Model, Node, ShareableResource, Vm};
use vmplace_plan::{Action, ActionKind, Event};

use super::{Constraint, SatConstraint, ensure_resource, list, restriction};
use crate::checker::{CheckerBase, SatConstraintChecker};
use crate::error::ConstraintResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceCapacity {
    nodes: BTreeSet<Node>,
    resource: String,
    amount: u64,
    #[serde(default)]
    continuous: bool,
}

impl ResourceCapacity {
    pub fn new(
        nodes: impl IntoIterator<Item = Node>,
        resource: impl Into<String>,
        amount: u64,
    ) -> ConstraintResult<Self> {
        let c = Self {
            nodes: nodes.into_iter().collect(),
            resource: resource.into(),
            amount,
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
        ensure_resource("resource_capacity", &self.resource)
    }

    pub fn nodes(&self) -> &BTreeSet<Node> {
        &self.nodes
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }
}

impl SatConstraint for ResourceCapacity {
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
        Box::new(ResourceCapacityChecker {
            cstr: self.clone(),
            base: CheckerBase::new(BTreeSet::new(), self.involved_nodes()),
            load: None,
        })
    }
}

impl fmt::Display for ResourceCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "resource_capacity(nodes={}, rc={}, amount={}, {})",
            list(&self.nodes),
            self.resource,
            self.amount,
            restriction(self.continuous)
        )
    }
}

/// Running consumption of a resource over a set of nodes during a replay.
///
/// A VM arriving on the set is charged from the start of its action; a VM
/// leaving the set is credited once its action ends. A migration inside
/// the set is charged on both nodes until it ends. Allocation increases
/// are charged at start, decreases credited at end.
#[derive(Debug, Clone)]
pub(crate) struct ResourceLoad {
    rc: ShareableResource,
    nodes: BTreeSet<Node>,
    bound: u64,
    /// Number of nodes of the set each VM is charged on.
    charged: BTreeMap<Vm, u32>,
}

impl ResourceLoad {
    /// `None` when the model lacks the resource view.
    pub(crate) fn seed(
        mo: &Model,
        resource: &str,
        nodes: BTreeSet<Node>,
        bound: impl FnOnce(&ShareableResource) -> u64,
    ) -> Option<Self> {
        let rc = mo.resource(resource)?.clone();
        let charged = mo
            .mapping()
            .running_vms_on_any(&nodes)
            .into_iter()
            .map(|vm| (vm, 1))
            .collect();
        Some(Self {
            bound: bound(&rc),
            rc,
            nodes,
            charged,
        })
    }

    pub(crate) fn used(&self) -> u64 {
        self.charged
            .iter()
            .map(|(vm, count)| u64::from(self.rc.consumption(*vm)) * u64::from(*count))
            .sum()
    }

    pub(crate) fn fits(&self) -> bool {
        let used = self.used();
        if used > self.bound {
            debug!(rc = self.rc.id(), used, bound = self.bound, "capacity exceeded");
            return false;
        }
        true
    }

    pub(crate) fn start(&mut self, a: &Action) -> bool {
        if let Some(p) = a.kind().running_vm_placement() {
            if !self.nodes.contains(&p.dst) {
                return true;
            }
            *self.charged.entry(p.vm).or_default() += 1;
            return self.fits();
        }
        match a.kind() {
            ActionKind::Allocate { vm, resource, amount, .. }
                if *resource == self.rc.id() && *amount > self.rc.consumption(*vm) =>
            {
                self.rc.set_consumption(*vm, *amount);
                self.fits()
            }
            _ => true,
        }
    }

    pub(crate) fn end(&mut self, a: &Action) {
        if let ActionKind::Allocate { vm, resource, amount, .. } = a.kind() {
            if *resource == self.rc.id() && *amount < self.rc.consumption(*vm) {
                self.rc.set_consumption(*vm, *amount);
            }
            return;
        }
        let Some((vm, src)) = a.kind().running_vm_departure() else {
            return;
        };
        let dst = a.kind().running_vm_placement().map(|p| p.dst);
        if dst == Some(src) || !self.nodes.contains(&src) {
            return;
        }
        if let Some(count) = self.charged.get_mut(&vm) {
            *count -= 1;
            if *count == 0 {
                self.charged.remove(&vm);
            }
        }
    }

    pub(crate) fn consume(&mut self, e: &Event) -> bool {
        match e {
            Event::Allocate { vm, resource, amount } if *resource == self.rc.id() => {
                self.rc.set_consumption(*vm, *amount);
                self.fits()
            }
            _ => true,
        }
    }

    pub(crate) fn substitute_vm(&mut self, old: Vm, new: Vm) {
        self.rc.substitute_vm(old, new);
        if let Some(count) = self.charged.remove(&old) {
            self.charged.insert(new, count);
        }
    }
}

struct ResourceCapacityChecker {
    cstr: ResourceCapacity,
    base: CheckerBase,
    load: Option<ResourceLoad>,
}

impl SatConstraintChecker for ResourceCapacityChecker {
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
        let amount = self.cstr.amount;
        self.load = ResourceLoad::seed(mo, &self.cstr.resource, self.base.nodes().clone(), |_| amount);
        match &self.load {
            Some(load) => load.fits(),
            None => {
                debug!(rc = %self.cstr.resource, "missing resource view");
                false
            }
        }
    }

    fn start(&mut self, a: &Action) -> bool {
        self.load.as_mut().is_none_or(|load| load.start(a))
    }

    fn end(&mut self, a: &Action) {
        if let Some(load) = self.load.as_mut() {
            load.end(a);
        }
    }

    fn consume(&mut self, e: &Event) -> bool {
        self.load.as_mut().is_none_or(|load| load.consume(e))
    }

    fn substitute_vm(&mut self, old: Vm, new: Vm) {
        self.base.substitute_vm(old, new);
        if let Some(load) = self.load.as_mut() {
            load.substitute_vm(old, new);
        }
    }

    fn ends_with(&mut self, mo: &Model) -> bool {
        let Some(rc) = mo.resource(&self.cstr.resource) else {
            debug!(rc = %self.cstr.resource, "missing resource view");
            return false;
        };
        let running = mo.mapping().running_vms_on_any(self.base.nodes());
        rc.sum_consumption(&running) <= self.cstr.amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmplace_plan::{Hook, ReconfigurationPlan};

    fn n(i: u32) -> Node {
        Node::new(i)
    }

    fn v(i: u32) -> Vm {
        Vm::new(i)
    }

    /// v1 (2 cpu) and v2 (3 cpu) on n1, v3 (4 cpu) on n3, v4 (1 cpu) ready.
    fn make_model() -> Model {
        let mut mo = Model::new();
        let map = mo.mapping_mut();
        for i in 1..=3 {
            map.add_online_node(n(i));
        }
        map.add_running_vm(v(1), n(1)).unwrap();
        map.add_running_vm(v(2), n(1)).unwrap();
        map.add_running_vm(v(3), n(3)).unwrap();
        map.add_ready_vm(v(4));
        let mut rc = ShareableResource::new("cpu");
        rc.set_consumption(v(1), 2)
            .set_consumption(v(2), 3)
            .set_consumption(v(3), 4)
            .set_consumption(v(4), 1);
        mo.attach(rc);
        mo
    }

    fn make_cstr(amount: u64) -> ResourceCapacity {
        ResourceCapacity::new([n(1), n(2)], "cpu", amount).unwrap()
    }

    fn plan_with(actions: Vec<Action>) -> ReconfigurationPlan {
        let mut p = ReconfigurationPlan::new(make_model());
        for a in actions {
            p.add(a).unwrap();
        }
        p
    }

    #[test]
    fn empty_resource_is_refused() {
        assert!(ResourceCapacity::new([n(1)], " ", 3).is_err());
    }

    #[test]
    fn model_checks() {
        let mo = make_model();
        assert!(make_cstr(5).is_satisfied(&mo));
        assert!(!make_cstr(4).is_satisfied(&mo));
        assert!(!ResourceCapacity::new([n(1)], "mem", 100).unwrap().is_satisfied(&mo));
    }

    #[test]
    fn migration_inside_the_set_is_charged_twice() {
        let p = plan_with(vec![Action::migrate(v(1), n(1), n(2), 0, 2)]);
        assert!(make_cstr(5).is_satisfied_by(&p));
        assert!(!make_cstr(5).with_continuous(true).is_satisfied_by(&p));
        assert!(make_cstr(7).with_continuous(true).is_satisfied_by(&p));
    }

    #[test]
    fn departures_are_credited_at_end() {
        // v3 arrives while v2 is still shutting down
        let p = plan_with(vec![
            Action::shutdown_vm(v(2), n(1), 0, 3),
            Action::migrate(v(3), n(3), n(2), 1, 4),
        ]);
        assert!(make_cstr(6).is_satisfied_by(&p));
        assert!(!make_cstr(6).with_continuous(true).is_satisfied_by(&p));

        let p = plan_with(vec![
            Action::shutdown_vm(v(2), n(1), 0, 3),
            Action::migrate(v(3), n(3), n(2), 3, 4),
        ]);
        assert!(make_cstr(6).with_continuous(true).is_satisfied_by(&p));
    }

    #[test]
    fn allocations() {
        let grow = plan_with(vec![Action::allocate(v(1), n(1), "cpu", 4, 0, 1)]);
        assert!(!make_cstr(6).with_continuous(true).is_satisfied_by(&grow));
        assert!(make_cstr(7).with_continuous(true).is_satisfied_by(&grow));

        let event = plan_with(vec![
            Action::boot_vm(v(4), n(2), 0, 1).with_event(Hook::End, Event::allocate(v(4), "cpu", 3)),
        ]);
        assert!(make_cstr(8).with_continuous(true).is_satisfied_by(&event));
        assert!(!make_cstr(7).with_continuous(true).is_satisfied_by(&event));
    }
}
