//! Error types for the infrastructure model.

use thiserror::Error;

use crate::element::{Element, Node, Vm};

/// Result type alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised when a model mutation would break a mapping invariant.
///
/// A failing mutation leaves the model untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("element already registered: {0}")]
    AlreadyRegistered(Element),

    #[error("unknown node: {0}")]
    UnknownNode(Node),

    #[error("unknown vm: {0}")]
    UnknownVm(Vm),

    #[error("node is offline: {0}")]
    NodeOffline(Node),

    #[error("node is already online: {0}")]
    NodeOnline(Node),

    #[error("node {0} still hosts {1} vm(s)")]
    NodeNotEmpty(Node, usize),

    #[error("{vm} is {actual}, expected {expected}")]
    UnexpectedVmState {
        vm: Vm,
        expected: String,
        actual: String,
    },

    #[error("{0} is already known")]
    VmAlreadyPlaced(Vm),

    #[error("inconsistent mapping: {0}")]
    InconsistentMapping(String),

    #[error("missing view: {0}")]
    MissingView(String),

    #[error("invalid value for '{view}': {reason}")]
    InvalidViewValue { view: String, reason: String },
}
