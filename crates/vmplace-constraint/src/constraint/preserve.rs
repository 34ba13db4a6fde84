//! Preserve: a running VM is granted at least a given amount of a resource.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vmplace_core::{Model, Node, Vm};

use super::{Constraint, SatConstraint, discrete_only, ensure_resource};
use crate::checker::{CheckerBase, SatConstraintChecker};
use crate::error::ConstraintResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Preserve {
    vm: Vm,
    resource: String,
    amount: u32,
}

impl Preserve {
    pub fn new(vm: Vm, resource: impl Into<String>, amount: u32) -> ConstraintResult<Self> {
        let c = Self {
            vm,
            resource: resource.into(),
            amount,
        };
        c.validate()?;
        Ok(c)
    }

    pub fn validate(&self) -> ConstraintResult<()> {
        ensure_resource("preserve", &self.resource)
    }

    pub fn vm(&self) -> Vm {
        self.vm
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn amount(&self) -> u32 {
        self.amount
    }
}

impl SatConstraint for Preserve {
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
        discrete_only("preserve", continuous)
    }

    fn checker(&self) -> Box<dyn SatConstraintChecker> {
        Box::new(PreserveChecker {
            cstr: self.clone(),
            base: CheckerBase::new(self.involved_vms(), BTreeSet::new()),
        })
    }
}

impl fmt::Display for Preserve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "preserve(vm={}, rc={}, amount={}, discrete)",
            self.vm, self.resource, self.amount
        )
    }
}

struct PreserveChecker {
    cstr: Preserve,
    base: CheckerBase,
}

impl SatConstraintChecker for PreserveChecker {
    fn constraint(&self) -> Constraint {
        self.cstr.clone().into()
    }

    fn base(&self) -> &CheckerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CheckerBase {
        &mut self.base
    }

    fn ends_with(&mut self, mo: &Model) -> bool {
        let Some(rc) = mo.resource(&self.cstr.resource) else {
            debug!(rc = %self.cstr.resource, "missing resource view");
            return false;
        };
        self.base
            .vms()
            .iter()
            .filter(|vm| mo.mapping().is_running(**vm))
            .all(|vm| rc.consumption(*vm) >= self.cstr.amount)
    }
}
