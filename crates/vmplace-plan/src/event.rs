//! Zero-duration notification events attached to actions.

use std::fmt;

use serde::{Deserialize, Serialize};
use vmplace_core::{Model, ModelError, ModelResult, Vm};

/// Moment of an action at which an attached event is raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    /// Raised when the action begins.
    Start,
    /// Raised when the action completes.
    End,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::Start => f.write_str("start"),
            Hook::End => f.write_str("end"),
        }
    }
}

/// A notification raised as a side effect of an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A resource assignment became effective.
    Allocate { vm: Vm, resource: String, amount: u32 },
    /// The identity of a VM changed from `old` to `new`.
    SubstitutedVm { old: Vm, new: Vm },
}

impl Event {
    pub fn allocate(vm: Vm, resource: impl Into<String>, amount: u32) -> Self {
        Event::Allocate {
            vm,
            resource: resource.into(),
            amount,
        }
    }

    pub fn substituted(old: Vm, new: Vm) -> Self {
        Event::SubstitutedVm { old, new }
    }

    /// Apply the event to a model.
    pub fn apply(&self, mo: &mut Model) -> ModelResult<()> {
        match self {
            Event::Allocate { vm, resource, amount } => {
                let rc = mo
                    .resource_mut(resource)
                    .ok_or_else(|| ModelError::MissingView(resource.clone()))?;
                rc.set_consumption(*vm, *amount);
                Ok(())
            }
            Event::SubstitutedVm { old, new } => mo.substitute_vm(*old, *new),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Allocate { vm, resource, amount } => {
                write!(f, "allocate(vm={vm}, rc={resource}, amount={amount})")
            }
            Event::SubstitutedVm { old, new } => write!(f, "substitute(from={old}, to={new})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmplace_core::{Node, ShareableResource};

    fn make_model() -> (Model, Vm) {
        let mut mo = Model::new();
        let n = mo.new_node();
        let v = mo.new_vm();
        mo.mapping_mut().add_online_node(n);
        mo.mapping_mut().add_running_vm(v, n).unwrap();
        mo.attach(ShareableResource::new("cpu"));
        (mo, v)
    }

    #[test]
    fn allocate_sets_consumption() {
        let (mut mo, v) = make_model();
        Event::allocate(v, "cpu", 4).apply(&mut mo).unwrap();
        assert_eq!(mo.resource("cpu").unwrap().consumption(v), 4);
    }

    #[test]
    fn allocate_needs_the_view() {
        let (mut mo, v) = make_model();
        let err = Event::allocate(v, "mem", 4).apply(&mut mo).unwrap_err();
        assert_eq!(err, ModelError::MissingView("mem".into()));
    }

    #[test]
    fn substitution_rewrites_the_model() {
        let (mut mo, v) = make_model();
        let fresh = Vm::new(50);
        Event::substituted(v, fresh).apply(&mut mo).unwrap();
        assert!(mo.mapping().is_running(fresh));
        assert_eq!(mo.mapping().vm_location(fresh), Some(Node::new(0)));
    }

    #[test]
    fn display() {
        assert_eq!(
            Event::substituted(Vm::new(1), Vm::new(2)).to_string(),
            "substitute(from=vm#1, to=vm#2)"
        );
    }
}
