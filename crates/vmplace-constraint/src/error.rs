//! Constraint and verification error types.

use thiserror::Error;
use vmplace_core::ModelError;
use vmplace_plan::{PlanError, Time};

/// Configuration errors, raised when a constraint or an instance is built.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstraintError {
    #[error("{constraint}: groups must be disjoint, {element} belongs to several groups")]
    OverlappingGroups {
        constraint: &'static str,
        element: String,
    },

    #[error("{constraint}: groups must not be empty")]
    EmptyGroup { constraint: &'static str },

    #[error("{constraint}: {element} appears more than once")]
    DuplicateElement {
        constraint: &'static str,
        element: String,
    },

    #[error("{constraint}: a resource identifier is required")]
    EmptyResource { constraint: &'static str },

    #[error("overbook ratio must be at least 1, got {0}")]
    InvalidRatio(f64),

    #[error("{constraint} does not support the {restriction} restriction")]
    UnsupportedRestriction {
        constraint: &'static str,
        restriction: &'static str,
    },

    #[error("{constraint} needs the missing view '{view}'")]
    MissingView { constraint: String, view: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

pub type ConstraintResult<T> = Result<T, ConstraintError>;

/// Outcome of a rejected verification.
///
/// Violations name the offending constraint. A structural error means the
/// plan itself cannot be replayed, whatever the constraints.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
    #[error("origin model violates {constraint}")]
    Origin { constraint: String },

    #[error("{constraint} violated when {action} starts at t={time}")]
    Continuous {
        constraint: String,
        action: String,
        time: Time,
    },

    #[error("{constraint} violated by {event} raised by {action} at t={time}")]
    Event {
        constraint: String,
        event: String,
        action: String,
        time: Time,
    },

    #[error("resulting model violates {constraint}")]
    Result { constraint: String },

    #[error("the plan does not start from the instance model")]
    ForeignOrigin,

    #[error("unapplyable plan at t={time}: {source}")]
    Structural {
        time: Time,
        #[source]
        source: PlanError,
    },
}

impl CheckError {
    /// Whether the rejection comes from a constraint rather than from a
    /// malformed plan.
    pub fn is_violation(&self) -> bool {
        !matches!(self, CheckError::Structural { .. } | CheckError::ForeignOrigin)
    }

    /// The violated constraint, if any.
    pub fn constraint(&self) -> Option<&str> {
        match self {
            CheckError::Origin { constraint }
            | CheckError::Continuous { constraint, .. }
            | CheckError::Event { constraint, .. }
            | CheckError::Result { constraint } => Some(constraint),
            CheckError::ForeignOrigin | CheckError::Structural { .. } => None,
        }
    }
}

pub type CheckResult<T> = Result<T, CheckError>;
