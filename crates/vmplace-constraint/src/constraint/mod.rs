//! Placement constraints.
//!
//! Each constraint is an immutable record with structural equality and a
//! factory for a fresh [`SatConstraintChecker`]. [`Constraint`] is the closed
//! set of all of them.
//!
//! A discrete constraint is only checked against the resulting model. A
//! continuous one is also checked against the origin and every intermediate
//! state reached while the plan executes.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use vmplace_core::{Model, Node, Vm};
use vmplace_plan::ReconfigurationPlan;

use crate::checker::SatConstraintChecker;
use crate::error::{ConstraintError, ConstraintResult};
use crate::plan_checker::ReconfigurationPlanChecker;

pub mod among;
pub mod ban;
pub mod fence;
pub mod gather;
pub mod lonely;
pub mod max_online;
pub mod no_delay;
pub mod overbook;
pub mod preserve;
pub mod quarantine;
pub mod resource_capacity;
pub mod root;
pub mod running_capacity;
pub mod seq;
pub mod split;
pub mod split_among;
pub mod spread;
pub mod state;

pub use among::Among;
pub use ban::Ban;
pub use fence::Fence;
pub use gather::Gather;
pub use lonely::Lonely;
pub use max_online::MaxOnline;
pub use no_delay::NoDelay;
pub use overbook::Overbook;
pub use preserve::Preserve;
pub use quarantine::Quarantine;
pub use resource_capacity::ResourceCapacity;
pub use root::Root;
pub use running_capacity::RunningCapacity;
pub use seq::Seq;
pub use split::Split;
pub use split_among::SplitAmong;
pub use spread::Spread;
pub use state::{Killed, Offline, Online, Ready, Running, Sleeping};

pub trait SatConstraint: fmt::Display {
    fn involved_vms(&self) -> BTreeSet<Vm>;

    fn involved_nodes(&self) -> BTreeSet<Node>;

    fn is_continuous(&self) -> bool;

    /// Change the restriction. Fails when the constraint does not support
    /// the requested one.
    fn set_continuous(&mut self, continuous: bool) -> ConstraintResult<()>;

    /// A fresh, single-use checker.
    fn checker(&self) -> Box<dyn SatConstraintChecker>;

    /// Whether a model satisfies the constraint.
    fn is_satisfied(&self, mo: &Model) -> bool {
        self.checker().ends_with(mo)
    }

    /// Whether a plan satisfies the constraint.
    fn is_satisfied_by(&self, plan: &ReconfigurationPlan) -> bool {
        let mut chk = ReconfigurationPlanChecker::new();
        chk.add_checker(self.checker());
        chk.check(plan).is_ok()
    }
}

/// Any placement constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    Ready(Ready),
    Running(Running),
    Sleeping(Sleeping),
    Killed(Killed),
    Online(Online),
    Offline(Offline),
    Among(Among),
    Ban(Ban),
    Fence(Fence),
    Gather(Gather),
    Lonely(Lonely),
    Spread(Spread),
    Split(Split),
    SplitAmong(SplitAmong),
    Seq(Seq),
    Root(Root),
    Quarantine(Quarantine),
    ResourceCapacity(ResourceCapacity),
    RunningCapacity(RunningCapacity),
    MaxOnline(MaxOnline),
    Overbook(Overbook),
    Preserve(Preserve),
    NoDelay(NoDelay),
}

macro_rules! dispatch {
    ($self:expr, $c:ident => $body:expr) => {
        match $self {
            Constraint::Ready($c) => $body,
            Constraint::Running($c) => $body,
            Constraint::Sleeping($c) => $body,
            Constraint::Killed($c) => $body,
            Constraint::Online($c) => $body,
            Constraint::Offline($c) => $body,
            Constraint::Among($c) => $body,
            Constraint::Ban($c) => $body,
            Constraint::Fence($c) => $body,
            Constraint::Gather($c) => $body,
            Constraint::Lonely($c) => $body,
            Constraint::Spread($c) => $body,
            Constraint::Split($c) => $body,
            Constraint::SplitAmong($c) => $body,
            Constraint::Seq($c) => $body,
            Constraint::Root($c) => $body,
            Constraint::Quarantine($c) => $body,
            Constraint::ResourceCapacity($c) => $body,
            Constraint::RunningCapacity($c) => $body,
            Constraint::MaxOnline($c) => $body,
            Constraint::Overbook($c) => $body,
            Constraint::Preserve($c) => $body,
            Constraint::NoDelay($c) => $body,
        }
    };
}

impl Constraint {
    /// Re-run the construction checks, for records built by deserialization.
    pub fn validate(&self) -> ConstraintResult<()> {
        match self {
            Constraint::Among(c) => c.validate(),
            Constraint::Split(c) => c.validate(),
            Constraint::SplitAmong(c) => c.validate(),
            Constraint::Seq(c) => c.validate(),
            Constraint::ResourceCapacity(c) => c.validate(),
            Constraint::Overbook(c) => c.validate(),
            Constraint::Preserve(c) => c.validate(),
            _ => Ok(()),
        }
    }

    /// The resource view the constraint reads, if any.
    pub fn resource_id(&self) -> Option<&str> {
        match self {
            Constraint::ResourceCapacity(c) => Some(c.resource()),
            Constraint::Overbook(c) => Some(c.resource()),
            Constraint::Preserve(c) => Some(c.resource()),
            _ => None,
        }
    }
}

impl SatConstraint for Constraint {
    fn involved_vms(&self) -> BTreeSet<Vm> {
        dispatch!(self, c => c.involved_vms())
    }

    fn involved_nodes(&self) -> BTreeSet<Node> {
        dispatch!(self, c => c.involved_nodes())
    }

    fn is_continuous(&self) -> bool {
        dispatch!(self, c => c.is_continuous())
    }

    fn set_continuous(&mut self, continuous: bool) -> ConstraintResult<()> {
        dispatch!(self, c => c.set_continuous(continuous))
    }

    fn checker(&self) -> Box<dyn SatConstraintChecker> {
        dispatch!(self, c => c.checker())
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        dispatch!(self, c => write!(f, "{c}"))
    }
}

macro_rules! impl_from {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Constraint {
                fn from(c: $variant) -> Self {
                    Constraint::$variant(c)
                }
            }
        )*
    };
}

impl_from!(
    Ready,
    Running,
    Sleeping,
    Killed,
    Online,
    Offline,
    Among,
    Ban,
    Fence,
    Gather,
    Lonely,
    Spread,
    Split,
    SplitAmong,
    Seq,
    Root,
    Quarantine,
    ResourceCapacity,
    RunningCapacity,
    MaxOnline,
    Overbook,
    Preserve,
    NoDelay,
);

// ── Shared helpers ──────────────────────────────────────────────────

pub(crate) fn restriction(continuous: bool) -> &'static str {
    if continuous { "continuous" } else { "discrete" }
}

/// `[a, b, c]`
pub(crate) fn list<T: fmt::Display>(items: impl IntoIterator<Item = T>) -> String {
    let items: Vec<String> = items.into_iter().map(|i| i.to_string()).collect();
    format!("[{}]", items.join(", "))
}

/// `[[a, b], [c]]`
pub(crate) fn list_of_lists<T: fmt::Display>(groups: &[BTreeSet<T>]) -> String {
    list(groups.iter().map(|g| list(g.iter())))
}

pub(crate) fn discrete_only(constraint: &'static str, continuous: bool) -> ConstraintResult<()> {
    if continuous {
        return Err(ConstraintError::UnsupportedRestriction {
            constraint,
            restriction: "continuous",
        });
    }
    Ok(())
}

pub(crate) fn continuous_only(constraint: &'static str, continuous: bool) -> ConstraintResult<()> {
    if !continuous {
        return Err(ConstraintError::UnsupportedRestriction {
            constraint,
            restriction: "discrete",
        });
    }
    Ok(())
}

/// Groups must be non-empty and pairwise disjoint.
pub(crate) fn ensure_partition<T>(constraint: &'static str, groups: &[BTreeSet<T>]) -> ConstraintResult<()>
where
    T: Ord + Copy + fmt::Display,
{
    let mut seen = BTreeSet::new();
    for g in groups {
        if g.is_empty() {
            return Err(ConstraintError::EmptyGroup { constraint });
        }
        for e in g {
            if !seen.insert(*e) {
                return Err(ConstraintError::OverlappingGroups {
                    constraint,
                    element: e.to_string(),
                });
            }
        }
    }
    Ok(())
}

pub(crate) fn ensure_resource(constraint: &'static str, id: &str) -> ConstraintResult<()> {
    if id.trim().is_empty() {
        return Err(ConstraintError::EmptyResource { constraint });
    }
    Ok(())
}

/// Index of the group containing `e`.
pub(crate) fn group_of<T: Ord>(groups: &[BTreeSet<T>], e: &T) -> Option<usize> {
    groups.iter().position(|g| g.contains(e))
}
