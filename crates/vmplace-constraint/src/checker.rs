//! The checker protocol.
//!
//! A checker is the stateful, single-use verifier of one constraint over one
//! plan replay. Every hook accepts by default; concrete checkers override the
//! hooks they object to.
//!
//! Hook order during a replay:
//! 1. `starts_with(origin)`
//! 2. per timeline moment, `start(action)` or `end(action)`, then `consume`
//!    for every event the action raises at that moment, followed by
//!    `substitute_vm` when the event is a substitution
//! 3. `ends_with(result)`

use std::collections::BTreeSet;

use vmplace_core::{Model, Node, Vm};
use vmplace_plan::{Action, Event, RunningVmPlacement};

use crate::constraint::Constraint;

pub trait SatConstraintChecker {
    /// The constraint this checker verifies.
    fn constraint(&self) -> Constraint;

    fn base(&self) -> &CheckerBase;

    fn base_mut(&mut self) -> &mut CheckerBase;

    /// Validate the origin model and seed the internal state.
    fn starts_with(&mut self, _mo: &Model) -> bool {
        true
    }

    /// An action is about to begin. Returning `false` rejects the plan.
    fn start(&mut self, a: &Action) -> bool {
        match a.kind().running_vm_placement() {
            Some(p) => self.start_running_vm_placement(a, &p),
            None => true,
        }
    }

    /// An action completed.
    fn end(&mut self, a: &Action) {
        if let Some(p) = a.kind().running_vm_placement() {
            self.end_running_vm_placement(a, &p);
        }
    }

    /// Shared start hook of migrations, boots and resumes.
    fn start_running_vm_placement(&mut self, _a: &Action, _p: &RunningVmPlacement) -> bool {
        true
    }

    /// Shared end hook of migrations, boots and resumes.
    fn end_running_vm_placement(&mut self, _a: &Action, _p: &RunningVmPlacement) {}

    /// A notification event was raised. Returning `false` rejects the plan.
    fn consume(&mut self, _e: &Event) -> bool {
        true
    }

    /// Rewrite every remembered occurrence of `old` into `new`.
    fn substitute_vm(&mut self, old: Vm, new: Vm) {
        self.base_mut().substitute_vm(old, new);
    }

    /// Validate the resulting model.
    fn ends_with(&mut self, _mo: &Model) -> bool {
        true
    }
}

/// Handle on a VM set registered with [`CheckerBase::track`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tracked(usize);

/// Working copy of the involved elements plus the VM sets that follow
/// identity substitutions.
#[derive(Debug, Clone, Default)]
pub struct CheckerBase {
    vms: BTreeSet<Vm>,
    nodes: BTreeSet<Node>,
    tracked: Vec<BTreeSet<Vm>>,
}

impl CheckerBase {
    pub fn new(vms: BTreeSet<Vm>, nodes: BTreeSet<Node>) -> Self {
        Self {
            vms,
            nodes,
            tracked: Vec::new(),
        }
    }

    pub fn vms(&self) -> &BTreeSet<Vm> {
        &self.vms
    }

    pub fn vms_mut(&mut self) -> &mut BTreeSet<Vm> {
        &mut self.vms
    }

    pub fn nodes(&self) -> &BTreeSet<Node> {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut BTreeSet<Node> {
        &mut self.nodes
    }

    pub fn watches(&self, vm: Vm) -> bool {
        self.vms.contains(&vm)
    }

    /// Register a VM set that must follow identity substitutions.
    pub fn track(&mut self, set: BTreeSet<Vm>) -> Tracked {
        self.tracked.push(set);
        Tracked(self.tracked.len() - 1)
    }

    pub fn tracked(&self, t: Tracked) -> &BTreeSet<Vm> {
        &self.tracked[t.0]
    }

    pub fn tracked_mut(&mut self, t: Tracked) -> &mut BTreeSet<Vm> {
        &mut self.tracked[t.0]
    }

    pub fn substitute_vm(&mut self, old: Vm, new: Vm) {
        for set in self.tracked.iter_mut().chain(std::iter::once(&mut self.vms)) {
            if set.remove(&old) {
                set.insert(new);
            }
        }
    }
}

/// Whether an action manipulates one of the watched VMs. State-assertion
/// checkers deny such actions unless they lead to the asserted state.
pub fn touches_my_vms(base: &CheckerBase, a: &Action) -> bool {
    a.kind().vm().is_some_and(|v| base.watches(v))
}
