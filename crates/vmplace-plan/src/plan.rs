//! Reconfiguration plans.
//!
//! A plan is an origin model plus a multiset of timed actions. Its result is
//! the origin advanced through the [`Timeline`] of its actions.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use vmplace_core::Model;

use crate::action::{Action, Time};
use crate::error::{PlanError, PlanResult};
use crate::event::Hook;
use crate::timeline::{Moment, Timeline};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlanRecord {
    origin: Model,
    actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PlanRecord", into = "PlanRecord")]
pub struct ReconfigurationPlan {
    origin: Model,
    actions: Vec<Action>,
}

impl ReconfigurationPlan {
    pub fn new(origin: Model) -> Self {
        Self {
            origin,
            actions: Vec::new(),
        }
    }

    pub fn origin(&self) -> &Model {
        &self.origin
    }

    /// Add an action. Fails if it ends before it starts.
    pub fn add(&mut self, action: Action) -> PlanResult<()> {
        action.validate()?;
        self.actions.push(action);
        Ok(())
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn action(&self, idx: usize) -> PlanResult<&Action> {
        self.actions.get(idx).ok_or(PlanError::UnknownAction(idx))
    }

    pub fn size(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Completion time of the last action, 0 for an empty plan.
    pub fn duration(&self) -> Time {
        self.actions.iter().map(Action::end).max().unwrap_or(0)
    }

    pub fn timeline(&self) -> Timeline {
        Timeline::new(&self.actions)
    }

    /// Advance a copy of the origin through every action.
    pub fn result(&self) -> PlanResult<Model> {
        let mut mo = self.origin.clone();
        for m in &self.timeline() {
            self.advance(*m, &mut mo)?;
        }
        debug!(actions = self.actions.len(), duration = self.duration(), "plan applied");
        Ok(mo)
    }

    pub fn is_applyable(&self) -> bool {
        self.result().is_ok()
    }

    /// Apply what happens at one moment of the timeline: the action and its
    /// start events on a start, the end events on an end.
    pub fn advance(&self, m: Moment, mo: &mut Model) -> PlanResult<()> {
        let a = self.action(m.action)?;
        trace!(time = m.time, hook = %m.hook, action = %a, "advancing");
        if m.hook == Hook::Start {
            a.apply(mo)?;
        }
        a.apply_events(m.hook, mo)
    }
}

impl TryFrom<PlanRecord> for ReconfigurationPlan {
    type Error = PlanError;

    fn try_from(r: PlanRecord) -> PlanResult<Self> {
        let mut plan = ReconfigurationPlan::new(r.origin);
        for a in r.actions {
            plan.add(a)?;
        }
        Ok(plan)
    }
}

impl From<ReconfigurationPlan> for PlanRecord {
    fn from(p: ReconfigurationPlan) -> Self {
        PlanRecord {
            origin: p.origin,
            actions: p.actions,
        }
    }
}

impl fmt::Display for ReconfigurationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sorted: Vec<&Action> = self.actions.iter().collect();
        sorted.sort_by_key(|a| (a.start(), a.end()));
        for a in sorted {
            writeln!(f, "{}:{} {}", a.start(), a.end(), a)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmplace_core::{ModelError, Node, Vm};

    fn n(i: u32) -> Node {
        Node::new(i)
    }

    fn v(i: u32) -> Vm {
        Vm::new(i)
    }

    fn make_origin() -> Model {
        let mut mo = Model::new();
        let map = mo.mapping_mut();
        map.add_online_node(n(1));
        map.add_online_node(n(2));
        map.add_offline_node(n(3)).unwrap();
        map.add_running_vm(v(1), n(1)).unwrap();
        map.add_running_vm(v(2), n(2)).unwrap();
        mo
    }

    #[test]
    fn result_leaves_origin_untouched() {
        let mut p = ReconfigurationPlan::new(make_origin());
        p.add(Action::migrate(v(1), n(1), n(2), 0, 5)).unwrap();
        let res = p.result().unwrap();
        assert_eq!(res.mapping().vm_location(v(1)), Some(n(2)));
        assert_eq!(p.origin().mapping().vm_location(v(1)), Some(n(1)));
        assert_eq!(p.duration(), 5);
    }

    #[test]
    fn ordering_makes_room_first() {
        // v2 lands on n3 once booted, n2 goes down once v2 is gone
        let mut p = ReconfigurationPlan::new(make_origin());
        p.add(Action::migrate(v(2), n(2), n(3), 4, 6)).unwrap();
        p.add(Action::boot_node(n(3), 0, 4)).unwrap();
        p.add(Action::shutdown_node(n(2), 6, 8)).unwrap();
        let res = p.result().unwrap();
        assert!(res.mapping().is_offline(n(2)));
        assert_eq!(res.mapping().vm_location(v(2)), Some(n(3)));
    }

    #[test]
    fn broken_plan_is_not_applyable() {
        let mut p = ReconfigurationPlan::new(make_origin());
        p.add(Action::migrate(v(1), n(1), n(3), 0, 2)).unwrap();
        assert!(!p.is_applyable());
        assert!(matches!(
            p.result(),
            Err(PlanError::Unapplyable {
                source: ModelError::NodeOffline(_),
                ..
            })
        ));
    }

    #[test]
    fn add_rejects_reversed_interval() {
        let mut p = ReconfigurationPlan::new(make_origin());
        assert!(p.add(Action::boot_node(n(3), 5, 1)).is_err());
        assert!(p.is_empty());
    }

    #[test]
    fn display_sorts_by_start() {
        let mut p = ReconfigurationPlan::new(make_origin());
        p.add(Action::shutdown_vm(v(2), n(2), 3, 4)).unwrap();
        p.add(Action::boot_node(n(3), 0, 2)).unwrap();
        assert_eq!(
            p.to_string(),
            "0:2 boot_node(node=node#3)\n3:4 shutdown(vm=vm#2, on=node#2)\n"
        );
    }

    #[test]
    fn json_rejects_reversed_interval() {
        let mut p = ReconfigurationPlan::new(make_origin());
        p.add(Action::boot_node(n(3), 0, 2)).unwrap();
        let json = serde_json::to_string(&p).unwrap();
        let back: ReconfigurationPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
        let broken = json.replace("\"start\":0", "\"start\":9");
        assert!(serde_json::from_str::<ReconfigurationPlan>(&broken).is_err());
    }
}
