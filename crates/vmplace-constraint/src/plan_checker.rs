//! Verification driver.
//!
//! Replays the timeline of a plan through every registered checker at once
//! and stops at the first rejection. The driver owns the current model of
//! the replay; checkers only observe it through their hooks.

use tracing::{debug, info, trace, warn};
use vmplace_core::Model;
use vmplace_plan::{Action, Event, Hook, PlanError, ReconfigurationPlan, Time};

use crate::checker::SatConstraintChecker;
use crate::constraint::SatConstraint;
use crate::error::{CheckError, CheckResult};

/// Checks a plan against a set of constraints.
///
/// Checkers are single-use, so [`check`](Self::check) consumes the driver.
#[derive(Default)]
pub struct ReconfigurationPlanChecker {
    checkers: Vec<Box<dyn SatConstraintChecker>>,
}

impl ReconfigurationPlanChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_checker(&mut self, c: Box<dyn SatConstraintChecker>) {
        self.checkers.push(c);
    }

    /// Register a fresh checker of a constraint.
    pub fn add_constraint(&mut self, c: &dyn SatConstraint) {
        self.checkers.push(c.checker());
    }

    pub fn len(&self) -> usize {
        self.checkers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }

    /// Verify a plan. Returns on the first violation.
    pub fn check(mut self, plan: &ReconfigurationPlan) -> CheckResult<()> {
        let res = self.replay(plan);
        match &res {
            Ok(()) => info!(
                constraints = self.checkers.len(),
                actions = plan.size(),
                "plan accepted"
            ),
            Err(e) => warn!(error = %e, "plan rejected"),
        }
        res
    }

    fn replay(&mut self, plan: &ReconfigurationPlan) -> CheckResult<()> {
        for c in &mut self.checkers {
            if !c.starts_with(plan.origin()) {
                let constraint = c.constraint().to_string();
                debug!(constraint = %constraint, "origin rejected");
                return Err(CheckError::Origin { constraint });
            }
        }

        let mut current = plan.origin().clone();
        for m in &plan.timeline() {
            let a = plan
                .action(m.action)
                .map_err(|source| CheckError::Structural { time: m.time, source })?;
            trace!(time = m.time, hook = %m.hook, action = %a, "delivering");
            match m.hook {
                Hook::Start => {
                    for c in &mut self.checkers {
                        if !c.start(a) {
                            let constraint = c.constraint().to_string();
                            debug!(constraint = %constraint, action = %a, time = m.time, "action rejected");
                            return Err(CheckError::Continuous {
                                constraint,
                                action: a.to_string(),
                                time: m.time,
                            });
                        }
                    }
                    a.apply(&mut current)
                        .map_err(|source| CheckError::Structural { time: m.time, source })?;
                }
                Hook::End => {
                    for c in &mut self.checkers {
                        c.end(a);
                    }
                }
            }
            for e in a.events(m.hook) {
                self.dispatch(a, e, m.time, &mut current)?;
            }
        }

        for c in &mut self.checkers {
            if !c.ends_with(&current) {
                let constraint = c.constraint().to_string();
                debug!(constraint = %constraint, "result rejected");
                return Err(CheckError::Result { constraint });
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, a: &Action, e: &Event, time: Time, current: &mut Model) -> CheckResult<()> {
        trace!(time, event = %e, "delivering event");
        e.apply(current).map_err(|source| CheckError::Structural {
            time,
            source: PlanError::UnapplyableEvent {
                event: e.to_string(),
                source,
            },
        })?;
        for c in &mut self.checkers {
            if !c.consume(e) {
                let constraint = c.constraint().to_string();
                debug!(constraint = %constraint, event = %e, time, "event rejected");
                return Err(CheckError::Event {
                    constraint,
                    event: e.to_string(),
                    action: a.to_string(),
                    time,
                });
            }
        }
        if let Event::SubstitutedVm { old, new } = e {
            for c in &mut self.checkers {
                c.substitute_vm(*old, *new);
            }
        }
        Ok(())
    }
}
