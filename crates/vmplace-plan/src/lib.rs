//! vmplace reconfiguration plans.
//!
//! A plan moves a [`vmplace_core::Model`] from its origin to a target state
//! through timed actions. This crate replays plans; it does NOT judge them
//! (that's `vmplace-constraint`).
//!
//! # Components
//!
//! - **`action`**: the closed set of timed transitions
//! - **`event`**: notifications raised by actions (allocation, substitution)
//! - **`timeline`**: chronological start/end ordering with tie-break rules
//! - **`plan`**: `ReconfigurationPlan` and its result
//! - **`dependencies`**: which actions must end before another can start
//! - **`monitor`**: step-by-step execution tracking

pub mod action;
pub mod dependencies;
pub mod error;
pub mod event;
pub mod monitor;
pub mod plan;
pub mod timeline;

pub use action::{Action, ActionKind, HookedEvent, RunningVmPlacement, Time};
pub use dependencies::DependenciesExtractor;
pub use error::{PlanError, PlanResult};
pub use event::{Event, Hook};
pub use monitor::PlanMonitor;
pub use plan::ReconfigurationPlan;
pub use timeline::{Moment, Timeline};
