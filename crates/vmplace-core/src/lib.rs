//! vmplace core model: VMs, nodes and their placement.
//!
//! This crate holds the data the verification engine reasons about. It does
//! NOT know about actions or constraints (see `vmplace-plan` and
//! `vmplace-constraint`).
//!
//! # Components
//!
//! - **`element`**: `Vm`/`Node` handles and the monotonic id generator
//! - **`mapping`**: placement state with its invariants
//! - **`view`**: resource views (`ShareableResource`, `NamingService`)
//! - **`attributes`**: free-form per-element key/values
//! - **`model`**: a mapping plus views and attributes, cheaply clonable

pub mod attributes;
pub mod element;
pub mod error;
pub mod mapping;
pub mod model;
pub mod view;

pub use attributes::{AttrValue, Attributes};
pub use element::{Element, ElementBuilder, ElementKind, Node, Vm};
pub use error::{ModelError, ModelResult};
pub use mapping::{Mapping, VmState};
pub use model::Model;
pub use view::{NamingService, ShareableResource, View};
