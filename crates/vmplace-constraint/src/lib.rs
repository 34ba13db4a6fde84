//! vmplace constraint verification.
//!
//! Decides whether a [`vmplace_plan::ReconfigurationPlan`] satisfies a set
//! of placement constraints, at the end of the plan (discrete) or at every
//! instant of it (continuous).
//!
//! # Components
//!
//! - **`constraint`**: the constraint records and their checkers
//! - **`checker`**: the hook protocol every checker follows
//! - **`plan_checker`**: the driver replaying a plan through the checkers
//! - **`instance`**: a model, its constraints and an objective
//! - **`config`**: TOML description of an instance

pub mod checker;
pub mod config;
pub mod constraint;
pub mod error;
pub mod instance;
pub mod objective;
pub mod plan_checker;

pub use checker::{CheckerBase, SatConstraintChecker, Tracked};
pub use config::InstanceConfig;
pub use constraint::{Constraint, SatConstraint};
pub use error::{CheckError, CheckResult, ConstraintError, ConstraintResult};
pub use instance::Instance;
pub use objective::Objective;
pub use plan_checker::ReconfigurationPlanChecker;
