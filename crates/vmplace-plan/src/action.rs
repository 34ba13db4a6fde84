//! Timed state-transition actions.
//!
//! An [`Action`] is an [`ActionKind`] scheduled over `[start, end]` with an
//! optional list of notification events raised when it begins or completes.
//! Applying an action checks every precondition before touching the model,
//! so a failing application leaves the model unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};
use vmplace_core::{Model, ModelError, Node, Vm, VmState};

use crate::error::{PlanError, PlanResult};
use crate::event::{Event, Hook};

/// Instant in a plan, in ticks.
pub type Time = u32;

/// The transition performed by an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// Move a running VM between two online nodes.
    MigrateVm { vm: Vm, src: Node, dst: Node },
    /// Start a ready VM on an online node.
    BootVm { vm: Vm, dst: Node },
    /// Stop a running VM; it becomes ready.
    ShutdownVm { vm: Vm, host: Node },
    /// Put a running VM to sleep, possibly on another node.
    SuspendVm { vm: Vm, src: Node, dst: Node },
    /// Wake a sleeping VM up, possibly on another node.
    ResumeVm { vm: Vm, src: Node, dst: Node },
    /// Destroy a VM whatever its state. `host` is `None` for a ready VM.
    KillVm { vm: Vm, host: Option<Node> },
    /// Declare a new VM in the ready state.
    ForgeVm { vm: Vm },
    BootNode { node: Node },
    ShutdownNode { node: Node },
    /// Change the amount of a resource allocated to a running VM.
    Allocate {
        vm: Vm,
        resource: String,
        host: Node,
        amount: u32,
    },
}

/// A VM arriving in the running state on `dst`.
///
/// `src` is the node the VM leaves (migration, resume) or `None` when it was
/// not placed before (boot).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunningVmPlacement {
    pub vm: Vm,
    pub src: Option<Node>,
    pub dst: Node,
}

impl ActionKind {
    /// The VM manipulated by the action, if any.
    pub fn vm(&self) -> Option<Vm> {
        match self {
            ActionKind::MigrateVm { vm, .. }
            | ActionKind::BootVm { vm, .. }
            | ActionKind::ShutdownVm { vm, .. }
            | ActionKind::SuspendVm { vm, .. }
            | ActionKind::ResumeVm { vm, .. }
            | ActionKind::KillVm { vm, .. }
            | ActionKind::ForgeVm { vm }
            | ActionKind::Allocate { vm, .. } => Some(*vm),
            ActionKind::BootNode { .. } | ActionKind::ShutdownNode { .. } => None,
        }
    }

    /// The node switched on or off by a node action.
    pub fn node(&self) -> Option<Node> {
        match self {
            ActionKind::BootNode { node } | ActionKind::ShutdownNode { node } => Some(*node),
            _ => None,
        }
    }

    /// Migrate, boot and resume all end with a running VM.
    pub fn running_vm_placement(&self) -> Option<RunningVmPlacement> {
        match self {
            ActionKind::MigrateVm { vm, src, dst } | ActionKind::ResumeVm { vm, src, dst } => {
                Some(RunningVmPlacement {
                    vm: *vm,
                    src: Some(*src),
                    dst: *dst,
                })
            }
            ActionKind::BootVm { vm, dst } => Some(RunningVmPlacement {
                vm: *vm,
                src: None,
                dst: *dst,
            }),
            _ => None,
        }
    }

    /// The node a running VM stops running on, for shutdown, suspend,
    /// kill and migration.
    pub fn running_vm_departure(&self) -> Option<(Vm, Node)> {
        match self {
            ActionKind::MigrateVm { vm, src, .. } | ActionKind::SuspendVm { vm, src, .. } => {
                Some((*vm, *src))
            }
            ActionKind::ShutdownVm { vm, host } => Some((*vm, *host)),
            ActionKind::KillVm { vm, host: Some(host) } => Some((*vm, *host)),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::MigrateVm { .. } => "migrate",
            ActionKind::BootVm { .. } => "boot",
            ActionKind::ShutdownVm { .. } => "shutdown",
            ActionKind::SuspendVm { .. } => "suspend",
            ActionKind::ResumeVm { .. } => "resume",
            ActionKind::KillVm { .. } => "kill",
            ActionKind::ForgeVm { .. } => "forge",
            ActionKind::BootNode { .. } => "boot_node",
            ActionKind::ShutdownNode { .. } => "shutdown_node",
            ActionKind::Allocate { .. } => "allocate",
        }
    }

    /// Apply the transition to a model.
    pub fn apply(&self, mo: &mut Model) -> Result<(), ModelError> {
        match self {
            ActionKind::MigrateVm { vm, src, dst } => {
                expect_state(mo, *vm, VmState::Running(*src))?;
                mo.mapping_mut().add_running_vm(*vm, *dst)
            }
            ActionKind::BootVm { vm, dst } => {
                expect_state(mo, *vm, VmState::Ready)?;
                mo.mapping_mut().add_running_vm(*vm, *dst)
            }
            ActionKind::ShutdownVm { vm, host } => {
                expect_state(mo, *vm, VmState::Running(*host))?;
                mo.mapping_mut().add_ready_vm(*vm);
                Ok(())
            }
            ActionKind::SuspendVm { vm, src, dst } => {
                expect_state(mo, *vm, VmState::Running(*src))?;
                mo.mapping_mut().add_sleeping_vm(*vm, *dst)
            }
            ActionKind::ResumeVm { vm, src, dst } => {
                expect_state(mo, *vm, VmState::Sleeping(*src))?;
                mo.mapping_mut().add_running_vm(*vm, *dst)
            }
            ActionKind::KillVm { vm, host } => {
                let state = mo.mapping().vm_state(*vm).ok_or(ModelError::UnknownVm(*vm))?;
                if state.host() != *host {
                    return Err(ModelError::UnexpectedVmState {
                        vm: *vm,
                        expected: host.map_or_else(|| "ready".to_string(), |n| format!("hosted on {n}")),
                        actual: state.to_string(),
                    });
                }
                mo.mapping_mut().remove_vm(*vm);
                Ok(())
            }
            ActionKind::ForgeVm { vm } => {
                if mo.mapping().contains_vm(*vm) {
                    return Err(ModelError::VmAlreadyPlaced(*vm));
                }
                mo.mapping_mut().add_ready_vm(*vm);
                Ok(())
            }
            ActionKind::BootNode { node } => {
                if mo.mapping().is_online(*node) {
                    return Err(ModelError::NodeOnline(*node));
                }
                mo.mapping_mut().set_online(*node)
            }
            ActionKind::ShutdownNode { node } => {
                if mo.mapping().is_offline(*node) {
                    return Err(ModelError::NodeOffline(*node));
                }
                mo.mapping_mut().set_offline(*node)
            }
            ActionKind::Allocate {
                vm,
                resource,
                host,
                amount,
            } => {
                expect_state(mo, *vm, VmState::Running(*host))?;
                let rc = mo
                    .resource_mut(resource)
                    .ok_or_else(|| ModelError::MissingView(resource.clone()))?;
                rc.set_consumption(*vm, *amount);
                Ok(())
            }
        }
    }
}

fn expect_state(mo: &Model, vm: Vm, expected: VmState) -> Result<(), ModelError> {
    match mo.mapping().vm_state(vm) {
        Some(s) if s == expected => Ok(()),
        Some(s) => Err(ModelError::UnexpectedVmState {
            vm,
            expected: expected.to_string(),
            actual: s.to_string(),
        }),
        None => Err(ModelError::UnknownVm(vm)),
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::MigrateVm { vm, src, dst } => write!(f, "migrate(vm={vm}, from={src}, to={dst})"),
            ActionKind::BootVm { vm, dst } => write!(f, "boot(vm={vm}, on={dst})"),
            ActionKind::ShutdownVm { vm, host } => write!(f, "shutdown(vm={vm}, on={host})"),
            ActionKind::SuspendVm { vm, src, dst } => write!(f, "suspend(vm={vm}, from={src}, to={dst})"),
            ActionKind::ResumeVm { vm, src, dst } => write!(f, "resume(vm={vm}, from={src}, to={dst})"),
            ActionKind::KillVm { vm, host: Some(h) } => write!(f, "kill(vm={vm}, on={h})"),
            ActionKind::KillVm { vm, host: None } => write!(f, "kill(vm={vm})"),
            ActionKind::ForgeVm { vm } => write!(f, "forge(vm={vm})"),
            ActionKind::BootNode { node } => write!(f, "boot_node(node={node})"),
            ActionKind::ShutdownNode { node } => write!(f, "shutdown_node(node={node})"),
            ActionKind::Allocate {
                vm,
                resource,
                host,
                amount,
            } => write!(f, "allocate(vm={vm}, on={host}, rc={resource}, amount={amount})"),
        }
    }
}

/// An event attached to an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HookedEvent {
    pub hook: Hook,
    pub event: Event,
}

/// A transition scheduled over a time interval.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    kind: ActionKind,
    start: Time,
    end: Time,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    events: Vec<HookedEvent>,
}

impl Action {
    pub fn new(kind: ActionKind, start: Time, end: Time) -> Self {
        Self {
            kind,
            start,
            end,
            events: Vec::new(),
        }
    }

    pub fn migrate(vm: Vm, src: Node, dst: Node, start: Time, end: Time) -> Self {
        Self::new(ActionKind::MigrateVm { vm, src, dst }, start, end)
    }

    pub fn boot_vm(vm: Vm, dst: Node, start: Time, end: Time) -> Self {
        Self::new(ActionKind::BootVm { vm, dst }, start, end)
    }

    pub fn shutdown_vm(vm: Vm, host: Node, start: Time, end: Time) -> Self {
        Self::new(ActionKind::ShutdownVm { vm, host }, start, end)
    }

    pub fn suspend_vm(vm: Vm, src: Node, dst: Node, start: Time, end: Time) -> Self {
        Self::new(ActionKind::SuspendVm { vm, src, dst }, start, end)
    }

    pub fn resume_vm(vm: Vm, src: Node, dst: Node, start: Time, end: Time) -> Self {
        Self::new(ActionKind::ResumeVm { vm, src, dst }, start, end)
    }

    pub fn kill_vm(vm: Vm, host: Option<Node>, start: Time, end: Time) -> Self {
        Self::new(ActionKind::KillVm { vm, host }, start, end)
    }

    pub fn forge_vm(vm: Vm, start: Time, end: Time) -> Self {
        Self::new(ActionKind::ForgeVm { vm }, start, end)
    }

    pub fn boot_node(node: Node, start: Time, end: Time) -> Self {
        Self::new(ActionKind::BootNode { node }, start, end)
    }

    pub fn shutdown_node(node: Node, start: Time, end: Time) -> Self {
        Self::new(ActionKind::ShutdownNode { node }, start, end)
    }

    pub fn allocate(vm: Vm, host: Node, resource: impl Into<String>, amount: u32, start: Time, end: Time) -> Self {
        Self::new(
            ActionKind::Allocate {
                vm,
                resource: resource.into(),
                host,
                amount,
            },
            start,
            end,
        )
    }

    /// Attach an event, builder style.
    pub fn with_event(mut self, hook: Hook, event: Event) -> Self {
        self.add_event(hook, event);
        self
    }

    pub fn add_event(&mut self, hook: Hook, event: Event) {
        self.events.push(HookedEvent { hook, event });
    }

    pub fn kind(&self) -> &ActionKind {
        &self.kind
    }

    pub fn start(&self) -> Time {
        self.start
    }

    pub fn end(&self) -> Time {
        self.end
    }

    pub fn duration(&self) -> Time {
        self.end.saturating_sub(self.start)
    }

    /// Events raised at the given hook, in attachment order.
    pub fn events(&self, hook: Hook) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(move |e| e.hook == hook).map(|e| &e.event)
    }

    pub fn all_events(&self) -> &[HookedEvent] {
        &self.events
    }

    /// Reject an action ending before it starts.
    pub fn validate(&self) -> PlanResult<()> {
        if self.end < self.start {
            return Err(PlanError::InvalidTiming {
                action: self.kind.to_string(),
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    /// Apply the transition to a model. Attached events are not applied.
    pub fn apply(&self, mo: &mut Model) -> PlanResult<()> {
        self.kind.apply(mo).map_err(|source| PlanError::Unapplyable {
            action: self.kind.to_string(),
            source,
        })
    }

    /// Apply the events attached to a hook, in attachment order.
    pub fn apply_events(&self, hook: Hook, mo: &mut Model) -> PlanResult<()> {
        for e in self.events(hook) {
            e.apply(mo).map_err(|source| PlanError::UnapplyableEvent {
                event: e.to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmplace_core::ShareableResource;

    fn n(i: u32) -> Node {
        Node::new(i)
    }

    fn v(i: u32) -> Vm {
        Vm::new(i)
    }

    /// n1, n2 online, n3 offline; v1 running on n1, v2 sleeping on n2, v3 ready.
    fn make_model() -> Model {
        let mut mo = Model::new();
        for i in 1..=3 {
            mo.claim_node(i).unwrap();
        }
        for i in 1..=3 {
            mo.claim_vm(i).unwrap();
        }
        let map = mo.mapping_mut();
        map.add_online_node(n(1));
        map.add_online_node(n(2));
        map.add_offline_node(n(3)).unwrap();
        map.add_running_vm(v(1), n(1)).unwrap();
        map.add_sleeping_vm(v(2), n(2)).unwrap();
        map.add_ready_vm(v(3));
        mo.attach(ShareableResource::new("cpu"));
        mo
    }

    #[test]
    fn migrate_moves_running_vm() {
        let mut mo = make_model();
        Action::migrate(v(1), n(1), n(2), 0, 3).apply(&mut mo).unwrap();
        assert_eq!(mo.mapping().vm_location(v(1)), Some(n(2)));
        assert!(mo.mapping().is_running(v(1)));
    }

    #[test]
    fn migrate_from_wrong_host_fails_cleanly() {
        let mut mo = make_model();
        let before = mo.clone();
        let err = Action::migrate(v(1), n(2), n(1), 0, 3).apply(&mut mo).unwrap_err();
        assert!(matches!(err, PlanError::Unapplyable { .. }));
        assert_eq!(mo, before);
    }

    #[test]
    fn migrate_to_offline_node_fails() {
        let mut mo = make_model();
        let err = Action::migrate(v(1), n(1), n(3), 0, 3).apply(&mut mo).unwrap_err();
        assert_eq!(
            err,
            PlanError::Unapplyable {
                action: "migrate(vm=vm#1, from=node#1, to=node#3)".into(),
                source: ModelError::NodeOffline(n(3)),
            }
        );
    }

    #[test]
    fn vm_lifecycle() {
        let mut mo = make_model();
        Action::boot_vm(v(3), n(2), 0, 1).apply(&mut mo).unwrap();
        assert!(mo.mapping().is_running(v(3)));
        Action::suspend_vm(v(3), n(2), n(2), 1, 2).apply(&mut mo).unwrap();
        assert!(mo.mapping().is_sleeping(v(3)));
        Action::resume_vm(v(3), n(2), n(1), 2, 3).apply(&mut mo).unwrap();
        assert_eq!(mo.mapping().vm_location(v(3)), Some(n(1)));
        Action::shutdown_vm(v(3), n(1), 3, 4).apply(&mut mo).unwrap();
        assert!(mo.mapping().is_ready(v(3)));
        Action::kill_vm(v(3), None, 4, 5).apply(&mut mo).unwrap();
        assert!(!mo.mapping().contains_vm(v(3)));
    }

    #[test]
    fn kill_checks_the_host() {
        let mut mo = make_model();
        assert!(Action::kill_vm(v(2), Some(n(1)), 0, 1).apply(&mut mo).is_err());
        Action::kill_vm(v(2), Some(n(2)), 0, 1).apply(&mut mo).unwrap();
        assert!(!mo.mapping().contains_vm(v(2)));
    }

    #[test]
    fn forge_requires_unknown_vm() {
        let mut mo = make_model();
        assert!(Action::forge_vm(v(3), 0, 1).apply(&mut mo).is_err());
        Action::forge_vm(v(9), 0, 1).apply(&mut mo).unwrap();
        assert!(mo.mapping().is_ready(v(9)));
    }

    #[test]
    fn node_actions() {
        let mut mo = make_model();
        assert!(Action::boot_node(n(1), 0, 1).apply(&mut mo).is_err());
        Action::boot_node(n(3), 0, 1).apply(&mut mo).unwrap();
        assert!(mo.mapping().is_online(n(3)));
        assert!(Action::shutdown_node(n(1), 0, 1).apply(&mut mo).is_err());
        Action::shutdown_node(n(3), 1, 2).apply(&mut mo).unwrap();
        assert!(mo.mapping().is_offline(n(3)));
    }

    #[test]
    fn allocate_updates_the_view() {
        let mut mo = make_model();
        Action::allocate(v(1), n(1), "cpu", 7, 0, 1).apply(&mut mo).unwrap();
        assert_eq!(mo.resource("cpu").unwrap().consumption(v(1)), 7);
        assert!(Action::allocate(v(1), n(1), "mem", 7, 0, 1).apply(&mut mo).is_err());
        assert!(Action::allocate(v(2), n(2), "cpu", 7, 0, 1).apply(&mut mo).is_err());
    }

    #[test]
    fn timing_validation() {
        assert!(Action::boot_node(n(3), 3, 3).validate().is_ok());
        assert!(matches!(
            Action::boot_node(n(3), 4, 3).validate(),
            Err(PlanError::InvalidTiming { start: 4, end: 3, .. })
        ));
    }

    #[test]
    fn events_by_hook() {
        let a = Action::resume_vm(v(2), n(2), n(1), 0, 2)
            .with_event(Hook::End, Event::substituted(v(2), v(20)))
            .with_event(Hook::Start, Event::allocate(v(2), "cpu", 1));
        assert_eq!(a.events(Hook::Start).count(), 1);
        assert_eq!(a.events(Hook::End).next(), Some(&Event::substituted(v(2), v(20))));
        let json = serde_json::to_string(&a).unwrap();
        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn placement_helpers() {
        let p = ActionKind::BootVm { vm: v(1), dst: n(2) }.running_vm_placement().unwrap();
        assert_eq!(p.src, None);
        assert_eq!(p.dst, n(2));
        assert!(ActionKind::ShutdownVm { vm: v(1), host: n(1) }.running_vm_placement().is_none());
        assert_eq!(
            ActionKind::SuspendVm { vm: v(1), src: n(1), dst: n(2) }.running_vm_departure(),
            Some((v(1), n(1)))
        );
        assert_eq!(ActionKind::BootNode { node: n(4) }.vm(), None);
    }
}
