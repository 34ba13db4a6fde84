//! MaxOnline: at most a given number of nodes of a set are online.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vmplace_core::{Model, Node, Vm};
use vmplace_plan::{Action, ActionKind};

use super::{Constraint, SatConstraint, list, restriction};
use crate::checker::{CheckerBase, SatConstraintChecker};
use crate::error::ConstraintResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MaxOnline {
    nodes: BTreeSet<Node>,
    amount: usize,
    #[serde(default)]
    continuous: bool,
}

impl MaxOnline {
    pub fn new(nodes: impl IntoIterator<Item = Node>, amount: usize) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
            amount,
            continuous: false,
        }
    }

    pub fn with_continuous(mut self, continuous: bool) -> Self {
        self.continuous = continuous;
        self
    }

    pub fn nodes(&self) -> &BTreeSet<Node> {
        &self.nodes
    }

    pub fn amount(&self) -> usize {
        self.amount
    }
}

impl SatConstraint for MaxOnline {
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
        Box::new(MaxOnlineChecker {
            cstr: self.clone(),
            base: CheckerBase::new(BTreeSet::new(), self.involved_nodes()),
            online: BTreeSet::new(),
        })
    }
}

impl fmt::Display for MaxOnline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "max_online(nodes={}, amount={}, {})",
            list(&self.nodes),
            self.amount,
            restriction(self.continuous)
        )
    }
}

struct MaxOnlineChecker {
    cstr: MaxOnline,
    base: CheckerBase,
    /// Nodes of the set counted as online.
    online: BTreeSet<Node>,
}

impl MaxOnlineChecker {
    fn fits(&self) -> bool {
        if self.online.len() > self.cstr.amount {
            debug!(online = self.online.len(), amount = self.cstr.amount, "too many online nodes");
            return false;
        }
        true
    }
}

impl SatConstraintChecker for MaxOnlineChecker {
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
        self.online = self
            .base
            .nodes()
            .iter()
            .filter(|n| mo.mapping().is_online(**n))
            .copied()
            .collect();
        self.fits()
    }

    fn start(&mut self, a: &Action) -> bool {
        match a.kind() {
            ActionKind::BootNode { node } if self.cstr.continuous && self.base.nodes().contains(node) => {
                self.online.insert(*node);
                self.fits()
            }
            _ => true,
        }
    }

    fn end(&mut self, a: &Action) {
        if !self.cstr.continuous {
            return;
        }
        if let ActionKind::ShutdownNode { node } = a.kind() {
            self.online.remove(node);
        }
    }

    fn ends_with(&mut self, mo: &Model) -> bool {
        let online = self
            .base
            .nodes()
            .iter()
            .filter(|n| mo.mapping().is_online(**n))
            .count();
        online <= self.cstr.amount
    }
}
