//! Plan error types.

use thiserror::Error;
use vmplace_core::ModelError;

/// Errors raised while building or replaying a reconfiguration plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("invalid timing for {action}: end {end} is before start {start}")]
    InvalidTiming { action: String, start: u32, end: u32 },

    #[error("unapplyable action {action}: {source}")]
    Unapplyable {
        action: String,
        #[source]
        source: ModelError,
    },

    #[error("unapplyable event {event}: {source}")]
    UnapplyableEvent {
        event: String,
        #[source]
        source: ModelError,
    },

    #[error("no action at index {0}")]
    UnknownAction(usize),

    #[error("action {0} is already committed")]
    AlreadyCommitted(String),

    #[error("action {0} still waits for its dependencies")]
    Blocked(String),
}

pub type PlanResult<T> = Result<T, PlanError>;
