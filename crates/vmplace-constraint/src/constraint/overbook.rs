//! Overbook: the VMs running on a node consume at most its capacity of a
//! resource multiplied by a ratio.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vmplace_core::{Model, Node, ShareableResource, Vm};
use vmplace_plan::{Action, Event};

use super::resource_capacity::ResourceLoad;
use super::{Constraint, SatConstraint, ensure_resource, restriction};
use crate::checker::{CheckerBase, SatConstraintChecker};
use crate::error::{ConstraintError, ConstraintResult};

fn continuous_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overbook {
    node: Node,
    resource: String,
    ratio: f64,
    #[serde(default = "continuous_by_default")]
    continuous: bool,
}

impl Overbook {
    pub fn new(node: Node, resource: impl Into<String>, ratio: f64) -> ConstraintResult<Self> {
        let c = Self {
            node,
            resource: resource.into(),
            ratio,
            continuous: true,
        };
        c.validate()?;
        Ok(c)
    }

    pub fn with_continuous(mut self, continuous: bool) -> Self {
        self.continuous = continuous;
        self
    }

    pub fn validate(&self) -> ConstraintResult<()> {
        if !self.ratio.is_finite() || self.ratio < 1.0 {
            return Err(ConstraintError::InvalidRatio(self.ratio));
        }
        ensure_resource("overbook", &self.resource)
    }

    pub fn node(&self) -> Node {
        self.node
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Maximum consumption allowed on the node.
    pub fn bound(&self, rc: &ShareableResource) -> u64 {
        (f64::from(rc.capacity(self.node)) * self.ratio).floor() as u64
    }
}

impl SatConstraint for Overbook {
    fn involved_vms(&self) -> BTreeSet<Vm> {
        BTreeSet::new()
    }

    fn involved_nodes(&self) -> BTreeSet<Node> {
        BTreeSet::from([self.node])
    }

    fn is_continuous(&self) -> bool {
        self.continuous
    }

    fn set_continuous(&mut self, continuous: bool) -> ConstraintResult<()> {
        self.continuous = continuous;
        Ok(())
    }

    fn checker(&self) -> Box<dyn SatConstraintChecker> {
        Box::new(OverbookChecker {
            cstr: self.clone(),
            base: CheckerBase::new(BTreeSet::new(), self.involved_nodes()),
            load: None,
        })
    }
}

impl fmt::Display for Overbook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "overbook(node={}, rc={}, ratio={}, {})",
            self.node,
            self.resource,
            self.ratio,
            restriction(self.continuous)
        )
    }
}

struct OverbookChecker {
    cstr: Overbook,
    base: CheckerBase,
    load: Option<ResourceLoad>,
}

impl SatConstraintChecker for OverbookChecker {
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
        let cstr = &self.cstr;
        self.load = ResourceLoad::seed(mo, &cstr.resource, self.base.nodes().clone(), |rc| cstr.bound(rc));
        match &self.load {
            Some(load) => load.fits(),
            None => {
                debug!(rc = %self.cstr.resource, "missing resource view");
                false
            }
        }
    }

    fn start(&mut self, a: &Action) -> bool {
        self.load.as_mut().is_none_or(|load| load.start(a))
    }

    fn end(&mut self, a: &Action) {
        if let Some(load) = self.load.as_mut() {
            load.end(a);
        }
    }

    fn consume(&mut self, e: &Event) -> bool {
        self.load.as_mut().is_none_or(|load| load.consume(e))
    }

    fn substitute_vm(&mut self, old: Vm, new: Vm) {
        self.base.substitute_vm(old, new);
        if let Some(load) = self.load.as_mut() {
            load.substitute_vm(old, new);
        }
    }

    fn ends_with(&mut self, mo: &Model) -> bool {
        let Some(rc) = mo.resource(&self.cstr.resource) else {
            debug!(rc = %self.cstr.resource, "missing resource view");
            return false;
        };
        let running = mo.mapping().running_vms_on(self.cstr.node);
        rc.sum_consumption(&running) <= self.cstr.bound(rc)
    }
}
