//! State-assertion constraints: a VM or a node must end in a given state.
//!
//! All of them are discrete only. While the plan runs, lifecycle actions on
//! the watched element are denied unless they lead to (or keep) the
//! asserted state.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vmplace_core::{Model, Node, Vm};
use vmplace_plan::{Action, ActionKind, Event};

use super::{Constraint, SatConstraint, discrete_only};
use crate::checker::{CheckerBase, SatConstraintChecker, touches_my_vms};
use crate::error::ConstraintResult;

/// The state a VM is asserted to end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VmGoal {
    Ready,
    Running,
    Sleeping,
    Killed,
}

impl VmGoal {
    /// Whether an action on a watched VM is compatible with the goal.
    fn allows(self, kind: &ActionKind) -> bool {
        match self {
            VmGoal::Ready => matches!(kind, ActionKind::ShutdownVm { .. } | ActionKind::ForgeVm { .. }),
            VmGoal::Running => matches!(
                kind,
                ActionKind::BootVm { .. }
                    | ActionKind::ResumeVm { .. }
                    | ActionKind::MigrateVm { .. }
                    | ActionKind::Allocate { .. }
            ),
            VmGoal::Sleeping => matches!(kind, ActionKind::SuspendVm { .. }),
            VmGoal::Killed => matches!(kind, ActionKind::KillVm { .. }),
        }
    }

    fn reached(self, mo: &Model, vm: Vm) -> bool {
        let map = mo.mapping();
        match self {
            VmGoal::Ready => map.is_ready(vm),
            VmGoal::Running => map.is_running(vm),
            VmGoal::Sleeping => map.is_sleeping(vm),
            VmGoal::Killed => !map.contains_vm(vm),
        }
    }
}

struct VmStateChecker {
    cstr: Constraint,
    goal: VmGoal,
    base: CheckerBase,
}

impl VmStateChecker {
    fn new(cstr: Constraint, goal: VmGoal, vm: Vm) -> Self {
        Self {
            cstr,
            goal,
            base: CheckerBase::new(BTreeSet::from([vm]), BTreeSet::new()),
        }
    }
}

impl SatConstraintChecker for VmStateChecker {
    fn constraint(&self) -> Constraint {
        self.cstr.clone()
    }

    fn base(&self) -> &CheckerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CheckerBase {
        &mut self.base
    }

    fn start(&mut self, a: &Action) -> bool {
        if touches_my_vms(&self.base, a) && !self.goal.allows(a.kind()) {
            debug!(constraint = %self.cstr, action = %a, "action on a watched vm denied");
            return false;
        }
        true
    }

    fn consume(&mut self, e: &Event) -> bool {
        match e {
            Event::Allocate { vm, .. } => self.goal == VmGoal::Running || !self.base.watches(*vm),
            Event::SubstitutedVm { .. } => true,
        }
    }

    fn ends_with(&mut self, mo: &Model) -> bool {
        self.base.vms().iter().all(|vm| self.goal.reached(mo, *vm))
    }
}

macro_rules! vm_state_constraint {
    ($(#[$doc:meta])* $name:ident, $goal:ident, $label:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name {
            vm: Vm,
        }

        impl $name {
            pub fn new(vm: Vm) -> Self {
                Self { vm }
            }

            pub fn vm(&self) -> Vm {
                self.vm
            }
        }

        impl SatConstraint for $name {
            fn involved_vms(&self) -> BTreeSet<Vm> {
                BTreeSet::from([self.vm])
            }

            fn involved_nodes(&self) -> BTreeSet<Node> {
                BTreeSet::new()
            }

            fn is_continuous(&self) -> bool {
                false
            }

            fn set_continuous(&mut self, continuous: bool) -> ConstraintResult<()> {
                discrete_only($label, continuous)
            }

            fn checker(&self) -> Box<dyn SatConstraintChecker> {
                Box::new(VmStateChecker::new(self.clone().into(), VmGoal::$goal, self.vm))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "(vm={}, discrete)"), self.vm)
            }
        }
    };
}

vm_state_constraint!(
    /// The VM must end ready.
    Ready, Ready, "ready"
);
vm_state_constraint!(
    /// The VM must end running.
    Running, Running, "running"
);
vm_state_constraint!(
    /// The VM must end sleeping.
    Sleeping, Sleeping, "sleeping"
);
vm_state_constraint!(
    /// The VM must no longer exist at the end.
    Killed, Killed, "killed"
);

// ── Nodes ───────────────────────────────────────────────────────────

struct NodeStateChecker {
    cstr: Constraint,
    online: bool,
    base: CheckerBase,
}

impl SatConstraintChecker for NodeStateChecker {
    fn constraint(&self) -> Constraint {
        self.cstr.clone()
    }

    fn base(&self) -> &CheckerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CheckerBase {
        &mut self.base
    }

    fn start(&mut self, a: &Action) -> bool {
        let denied = match a.kind() {
            ActionKind::ShutdownNode { node } => self.online && self.base.nodes().contains(node),
            ActionKind::BootNode { node } => !self.online && self.base.nodes().contains(node),
            _ => false,
        };
        if denied {
            debug!(constraint = %self.cstr, action = %a, "node action denied");
        }
        !denied
    }

    fn ends_with(&mut self, mo: &Model) -> bool {
        self.base.nodes().iter().all(|n| {
            if self.online {
                mo.mapping().is_online(*n)
            } else {
                mo.mapping().is_offline(*n)
            }
        })
    }
}

macro_rules! node_state_constraint {
    ($(#[$doc:meta])* $name:ident, $online:literal, $label:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name {
            node: Node,
        }

        impl $name {
            pub fn new(node: Node) -> Self {
                Self { node }
            }

            pub fn node(&self) -> Node {
                self.node
            }
        }

        impl SatConstraint for $name {
            fn involved_vms(&self) -> BTreeSet<Vm> {
                BTreeSet::new()
            }

            fn involved_nodes(&self) -> BTreeSet<Node> {
                BTreeSet::from([self.node])
            }

            fn is_continuous(&self) -> bool {
                false
            }

            fn set_continuous(&mut self, continuous: bool) -> ConstraintResult<()> {
                discrete_only($label, continuous)
            }

            fn checker(&self) -> Box<dyn SatConstraintChecker> {
                Box::new(NodeStateChecker {
                    cstr: self.clone().into(),
                    online: $online,
                    base: CheckerBase::new(BTreeSet::new(), BTreeSet::from([self.node])),
                })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "(node={}, discrete)"), self.node)
            }
        }
    };
}

node_state_constraint!(
    /// The node must end online.
    Online, true, "online"
);
node_state_constraint!(
    /// The node must end offline.
    Offline, false, "offline"
);

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

    /// n1, n2 online, n3 offline; v1 running on n1, v2 sleeping on n1, v3 ready.
    fn make_model() -> Model {
        let mut mo = Model::new();
        let map = mo.mapping_mut();
        map.add_online_node(n(1));
        map.add_online_node(n(2));
        map.add_offline_node(n(3)).unwrap();
        map.add_running_vm(v(1), n(1)).unwrap();
        map.add_sleeping_vm(v(2), n(1)).unwrap();
        map.add_ready_vm(v(3));
        mo
    }

    fn plan_with(actions: Vec<Action>) -> ReconfigurationPlan {
        let mut p = ReconfigurationPlan::new(make_model());
        for a in actions {
            p.add(a).unwrap();
        }
        p
    }

    #[test]
    fn states_on_a_model() {
        let mo = make_model();
        assert!(Running::new(v(1)).is_satisfied(&mo));
        assert!(Sleeping::new(v(2)).is_satisfied(&mo));
        assert!(Ready::new(v(3)).is_satisfied(&mo));
        assert!(Killed::new(v(9)).is_satisfied(&mo));
        assert!(!Killed::new(v(1)).is_satisfied(&mo));
        assert!(!Ready::new(v(1)).is_satisfied(&mo));
        assert!(Online::new(n(1)).is_satisfied(&mo));
        assert!(Offline::new(n(3)).is_satisfied(&mo));
        assert!(!Offline::new(n(2)).is_satisfied(&mo));
    }

    #[test]
    fn reaching_the_state_is_allowed() {
        assert!(Ready::new(v(1)).is_satisfied_by(&plan_with(vec![Action::shutdown_vm(v(1), n(1), 0, 2)])));
        assert!(Running::new(v(3)).is_satisfied_by(&plan_with(vec![Action::boot_vm(v(3), n(2), 0, 2)])));
        assert!(Sleeping::new(v(1)).is_satisfied_by(&plan_with(vec![Action::suspend_vm(v(1), n(1), n(1), 0, 2)])));
        assert!(Killed::new(v(2)).is_satisfied_by(&plan_with(vec![Action::kill_vm(v(2), Some(n(1)), 0, 1)])));
        assert!(Offline::new(n(2)).is_satisfied_by(&plan_with(vec![Action::shutdown_node(n(2), 0, 1)])));
        assert!(Online::new(n(3)).is_satisfied_by(&plan_with(vec![Action::boot_node(n(3), 0, 1)])));
    }

    #[test]
    fn disturbing_the_watched_vm_is_denied() {
        // v1 migrates before being shut down
        let p = plan_with(vec![
            Action::migrate(v(1), n(1), n(2), 0, 2),
            Action::shutdown_vm(v(1), n(2), 2, 3),
        ]);
        assert!(!Ready::new(v(1)).is_satisfied_by(&p));
        // running VMs may move around
        let p = plan_with(vec![Action::migrate(v(1), n(1), n(2), 0, 2)]);
        assert!(Running::new(v(1)).is_satisfied_by(&p));
    }

    #[test]
    fn node_actions_are_denied() {
        let p = plan_with(vec![Action::shutdown_node(n(2), 0, 1), Action::boot_node(n(2), 1, 2)]);
        assert!(!Online::new(n(2)).is_satisfied_by(&p));
        let p = plan_with(vec![Action::boot_node(n(3), 0, 1), Action::shutdown_node(n(3), 1, 2)]);
        assert!(!Offline::new(n(3)).is_satisfied_by(&p));
    }

    #[test]
    fn allocation_events() {
        let mut chk = Running::new(v(1)).checker();
        assert!(chk.consume(&Event::allocate(v(1), "cpu", 2)));
        let mut chk = Sleeping::new(v(1)).checker();
        assert!(!chk.consume(&Event::allocate(v(1), "cpu", 2)));
        assert!(chk.consume(&Event::allocate(v(7), "cpu", 2)));
    }

    #[test]
    fn only_discrete() {
        let mut c = Killed::new(v(1));
        assert!(c.set_continuous(true).is_err());
        assert_eq!(c.to_string(), "killed(vm=vm#1, discrete)");
        assert_eq!(Offline::new(n(1)).to_string(), "offline(node=node#1, discrete)");
    }
}
