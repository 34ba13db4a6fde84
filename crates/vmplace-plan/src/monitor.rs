//! Step-by-step execution tracking of a plan.
//!
//! The monitor starts from the plan origin and lets a caller commit actions
//! one at a time, in any order compatible with the dependencies computed by
//! [`DependenciesExtractor`].

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;
use vmplace_core::Model;

use crate::dependencies::DependenciesExtractor;
use crate::error::{PlanError, PlanResult};
use crate::event::Hook;
use crate::plan::ReconfigurationPlan;

pub struct PlanMonitor<'a> {
    plan: &'a ReconfigurationPlan,
    current: Model,
    /// Number of dependencies not committed yet, per action.
    pending: Vec<usize>,
    dependents: BTreeMap<usize, Vec<usize>>,
    committed: BTreeSet<usize>,
}

impl<'a> PlanMonitor<'a> {
    pub fn new(plan: &'a ReconfigurationPlan) -> Self {
        let ex = DependenciesExtractor::from_plan(plan);
        let mut pending = Vec::with_capacity(plan.size());
        let mut dependents: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..plan.size() {
            let deps = ex.dependencies(i);
            pending.push(deps.len());
            for d in deps {
                dependents.entry(d).or_default().push(i);
            }
        }
        Self {
            plan,
            current: plan.origin().clone(),
            pending,
            dependents,
            committed: BTreeSet::new(),
        }
    }

    pub fn current_model(&self) -> &Model {
        &self.current
    }

    pub fn committed_count(&self) -> usize {
        self.committed.len()
    }

    pub fn is_committed(&self, idx: usize) -> bool {
        self.committed.contains(&idx)
    }

    /// Whether action `idx` still waits for an uncommitted dependency.
    pub fn is_blocked(&self, idx: usize) -> bool {
        self.pending.get(idx).is_some_and(|p| *p > 0)
    }

    /// Actions that can be committed right now.
    pub fn feasible(&self) -> Vec<usize> {
        (0..self.plan.size())
            .filter(|i| !self.committed.contains(i) && !self.is_blocked(*i))
            .collect()
    }

    /// Apply action `idx` and all its events to the current model. Returns
    /// the actions this commit unblocked. A failing commit changes nothing.
    pub fn commit(&mut self, idx: usize) -> PlanResult<Vec<usize>> {
        let plan = self.plan;
        let a = plan.action(idx)?;
        if self.committed.contains(&idx) {
            return Err(PlanError::AlreadyCommitted(a.to_string()));
        }
        if self.is_blocked(idx) {
            return Err(PlanError::Blocked(a.to_string()));
        }
        let mut next = self.current.clone();
        a.apply(&mut next)?;
        a.apply_events(Hook::Start, &mut next)?;
        a.apply_events(Hook::End, &mut next)?;
        self.current = next;
        self.committed.insert(idx);

        let mut unblocked = Vec::new();
        for d in self.dependents.get(&idx).into_iter().flatten() {
            if let Some(p) = self.pending.get_mut(*d) {
                *p -= 1;
                if *p == 0 {
                    unblocked.push(*d);
                }
            }
        }
        debug!(action = %a, unblocked = unblocked.len(), "action committed");
        Ok(unblocked)
    }
}
