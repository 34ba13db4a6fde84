//! Gather: the running VMs of a set share one host.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vmplace_core::{Model, Node, Vm};
use vmplace_plan::{Action, RunningVmPlacement};

use super::{Constraint, SatConstraint, list, restriction};
use crate::checker::{CheckerBase, SatConstraintChecker};
use crate::error::ConstraintResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gather {
    vms: BTreeSet<Vm>,
    #[serde(default)]
    continuous: bool,
}

impl Gather {
    pub fn new(vms: impl IntoIterator<Item = Vm>) -> Self {
        Self {
            vms: vms.into_iter().collect(),
            continuous: false,
        }
    }

    pub fn with_continuous(mut self, continuous: bool) -> Self {
        self.continuous = continuous;
        self
    }

    pub fn vms(&self) -> &BTreeSet<Vm> {
        &self.vms
    }
}

impl SatConstraint for Gather {
    fn involved_vms(&self) -> BTreeSet<Vm> {
        self.vms.clone()
    }

    fn involved_nodes(&self) -> BTreeSet<Node> {
        BTreeSet::new()
    }

    fn is_continuous(&self) -> bool {
        self.continuous
    }

    fn set_continuous(&mut self, continuous: bool) -> ConstraintResult<()> {
        self.continuous = continuous;
        Ok(())
    }

    fn checker(&self) -> Box<dyn SatConstraintChecker> {
        Box::new(GatherChecker {
            cstr: self.clone(),
            base: CheckerBase::new(self.involved_vms(), BTreeSet::new()),
            host: None,
        })
    }
}

impl fmt::Display for Gather {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gather(vms={}, {})", list(&self.vms), restriction(self.continuous))
    }
}

struct GatherChecker {
    cstr: Gather,
    base: CheckerBase,
    host: Option<Node>,
}

impl GatherChecker {
    fn bind(&mut self, n: Node) -> bool {
        match self.host {
            Some(h) if h != n => {
                debug!(bound = %h, node = %n, "vms spread over two hosts");
                false
            }
            Some(_) => true,
            None => {
                self.host = Some(n);
                true
            }
        }
    }

    fn bind_all(&mut self, mo: &Model) -> bool {
        self.host = None;
        let hosts: Vec<Node> = self
            .base
            .vms()
            .iter()
            .filter(|vm| mo.mapping().is_running(**vm))
            .filter_map(|vm| mo.mapping().vm_location(*vm))
            .collect();
        hosts.into_iter().all(|n| self.bind(n))
    }
}

impl SatConstraintChecker for GatherChecker {
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
        !self.cstr.continuous || self.bind_all(mo)
    }

    fn start_running_vm_placement(&mut self, _a: &Action, p: &RunningVmPlacement) -> bool {
        if !self.cstr.continuous || !self.base.watches(p.vm) {
            return true;
        }
        self.bind(p.dst)
    }

    fn ends_with(&mut self, mo: &Model) -> bool {
        self.bind_all(mo)
    }
}
