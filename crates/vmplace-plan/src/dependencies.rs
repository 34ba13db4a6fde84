//! Causal dependencies between the actions of a plan.
//!
//! An action *demands* room on a node when it brings a VM there, shuts the
//! node down or increases an allocation on it. An action *frees* a node when
//! a VM leaves it, when it boots the node or when it lowers an allocation.
//! The dependencies of a demanding action are the freeing actions on the
//! same node that end no later than it starts.

use std::collections::{BTreeMap, BTreeSet};

use vmplace_core::{Model, Node};

use crate::action::{Action, ActionKind};
use crate::plan::ReconfigurationPlan;

#[derive(Debug, Clone, Default)]
pub struct DependenciesExtractor {
    demanding_node: BTreeMap<usize, Node>,
    freeing: BTreeMap<Node, BTreeSet<usize>>,
    demanding: BTreeMap<Node, BTreeSet<usize>>,
    starts: Vec<u32>,
    ends: Vec<u32>,
}

impl DependenciesExtractor {
    /// Classify every action of the plan against its origin.
    pub fn from_plan(plan: &ReconfigurationPlan) -> Self {
        let mut ex = Self::default();
        for (i, a) in plan.actions().iter().enumerate() {
            ex.register(plan.origin(), i, a);
        }
        ex
    }

    /// Classify one action. `idx` must be the position of the action in
    /// the plan; actions must be registered in that order.
    pub fn register(&mut self, origin: &Model, idx: usize, a: &Action) {
        debug_assert_eq!(idx, self.starts.len(), "actions registered out of order");
        self.starts.push(a.start());
        self.ends.push(a.end());
        match a.kind() {
            ActionKind::MigrateVm { src, dst, .. } => {
                self.freeing.entry(*src).or_default().insert(idx);
                self.demand(idx, *dst);
            }
            ActionKind::BootVm { dst, .. } | ActionKind::ResumeVm { dst, .. } => self.demand(idx, *dst),
            ActionKind::ShutdownNode { node } => self.demand(idx, *node),
            ActionKind::BootNode { node } => {
                self.freeing.entry(*node).or_default().insert(idx);
            }
            ActionKind::ShutdownVm { host, .. } => {
                self.freeing.entry(*host).or_default().insert(idx);
            }
            ActionKind::KillVm { host, .. } => {
                if let Some(h) = host {
                    self.freeing.entry(*h).or_default().insert(idx);
                }
            }
            ActionKind::SuspendVm { src, .. } => {
                self.freeing.entry(*src).or_default().insert(idx);
            }
            ActionKind::ForgeVm { .. } => {}
            ActionKind::Allocate {
                vm,
                resource,
                host,
                amount,
            } => {
                // An allocation on an unknown resource has no dependency.
                let Some(rc) = origin.resource(resource) else {
                    return;
                };
                if *amount > rc.consumption(*vm) {
                    self.demand(idx, *host);
                } else {
                    self.freeing.entry(*host).or_default().insert(idx);
                }
            }
        }
    }

    fn demand(&mut self, idx: usize, n: Node) {
        self.demanding.entry(n).or_default().insert(idx);
        self.demanding_node.insert(idx, n);
    }

    /// Actions that must be completed before action `idx` can start.
    pub fn dependencies(&self, idx: usize) -> BTreeSet<usize> {
        let (Some(n), Some(start)) = (self.demanding_node.get(&idx), self.starts.get(idx)) else {
            return BTreeSet::new();
        };
        self.freeing
            .get(n)
            .into_iter()
            .flatten()
            .copied()
            .filter(|&f| f != idx && self.ends[f] <= *start)
            .collect()
    }

    /// Actions demanding room on a node.
    pub fn demanding_on(&self, n: Node) -> BTreeSet<usize> {
        self.demanding.get(&n).cloned().unwrap_or_default()
    }

    /// Actions freeing room on a node.
    pub fn freeing_on(&self, n: Node) -> BTreeSet<usize> {
        self.freeing.get(&n).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmplace_core::{ShareableResource, Vm};

    fn n(i: u32) -> Node {
        Node::new(i)
    }

    fn v(i: u32) -> Vm {
        Vm::new(i)
    }

    fn make_plan() -> ReconfigurationPlan {
        let mut mo = Model::new();
        let map = mo.mapping_mut();
        map.add_online_node(n(1));
        map.add_online_node(n(2));
        map.add_running_vm(v(1), n(1)).unwrap();
        map.add_running_vm(v(2), n(2)).unwrap();
        map.add_running_vm(v(3), n(2)).unwrap();
        let mut rc = ShareableResource::new("cpu");
        rc.set_consumption(v(2), 4).set_consumption(v(3), 4);
        mo.attach(rc);
        let mut p = ReconfigurationPlan::new(mo);
        p.add(Action::shutdown_vm(v(2), n(2), 0, 3)).unwrap(); // 0
        p.add(Action::migrate(v(1), n(1), n(2), 3, 5)).unwrap(); // 1
        p.add(Action::allocate(v(3), n(2), "cpu", 2, 0, 1)).unwrap(); // 2
        p.add(Action::allocate(v(3), n(2), "cpu", 6, 5, 6)).unwrap(); // 3
        p.add(Action::shutdown_node(n(1), 5, 7)).unwrap(); // 4
        p
    }

    #[test]
    fn arrival_waits_for_departures() {
        let ex = DependenciesExtractor::from_plan(&make_plan());
        assert_eq!(ex.dependencies(1), BTreeSet::from([0, 2]));
    }

    #[test]
    fn node_shutdown_waits_for_its_vms() {
        let ex = DependenciesExtractor::from_plan(&make_plan());
        assert_eq!(ex.dependencies(4), BTreeSet::from([1]));
    }

    #[test]
    fn allocation_direction_decides() {
        let ex = DependenciesExtractor::from_plan(&make_plan());
        assert!(ex.dependencies(0).is_empty());
        assert!(ex.dependencies(2).is_empty());
        assert_eq!(ex.dependencies(3), BTreeSet::from([0, 2]));
        assert_eq!(ex.demanding_on(n(2)), BTreeSet::from([1, 3]));
        assert_eq!(ex.freeing_on(n(1)), BTreeSet::from([1]));
    }
}
