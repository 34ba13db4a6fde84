//! The infrastructure model: a mapping, named views and attributes.
//!
//! A `Model` is a plain value. `clone()` yields an independent snapshot that
//! can be mutated for what-if evaluation without touching the original.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::attributes::Attributes;
use crate::element::{ElementBuilder, Node, Vm};
use crate::error::{ModelError, ModelResult};
use crate::mapping::Mapping;
use crate::view::{ShareableResource, View};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    mapping: Mapping,
    views: BTreeMap<String, View>,
    attributes: Attributes,
    elements: ElementBuilder,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn mapping_mut(&mut self) -> &mut Mapping {
        &mut self.mapping
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    // ── Elements ────────────────────────────────────────────────────

    /// Allocate a fresh VM identifier.
    pub fn new_vm(&mut self) -> Vm {
        self.elements.new_vm()
    }

    /// Allocate a fresh node identifier.
    pub fn new_node(&mut self) -> Node {
        self.elements.new_node()
    }

    /// Register a VM with an explicit identifier.
    pub fn claim_vm(&mut self, id: u32) -> ModelResult<Vm> {
        self.elements.claim_vm(id)
    }

    /// Register a node with an explicit identifier.
    pub fn claim_node(&mut self, id: u32) -> ModelResult<Node> {
        self.elements.claim_node(id)
    }

    pub fn elements(&self) -> &ElementBuilder {
        &self.elements
    }

    // ── Views ───────────────────────────────────────────────────────

    /// Attach a view. Returns the view previously registered under the same
    /// identifier, if any.
    pub fn attach(&mut self, view: impl Into<View>) -> Option<View> {
        let view = view.into();
        let id = view.identifier();
        trace!(view = %id, "attaching view");
        self.views.insert(id, view)
    }

    pub fn detach(&mut self, id: &str) -> Option<View> {
        self.views.remove(id)
    }

    pub fn view(&self, id: &str) -> Option<&View> {
        self.views.get(id)
    }

    pub fn view_mut(&mut self, id: &str) -> Option<&mut View> {
        self.views.get_mut(id)
    }

    pub fn views(&self) -> impl Iterator<Item = &View> {
        self.views.values()
    }

    /// The shareable resource registered under `id`.
    pub fn resource(&self, id: &str) -> Option<&ShareableResource> {
        self.views.get(id).and_then(View::as_resource)
    }

    pub fn resource_mut(&mut self, id: &str) -> Option<&mut ShareableResource> {
        self.views.get_mut(id).and_then(View::as_resource_mut)
    }

    /// Like [`resource`](Self::resource), failing with
    /// [`ModelError::MissingView`] when absent.
    pub fn require_resource(&self, id: &str) -> ModelResult<&ShareableResource> {
        self.resource(id)
            .ok_or_else(|| ModelError::MissingView(id.to_string()))
    }

    // ── Substitution ────────────────────────────────────────────────

    /// Replace a VM identity by another one across the mapping, the views
    /// and the attributes.
    pub fn substitute_vm(&mut self, old: Vm, new: Vm) -> ModelResult<()> {
        self.mapping.substitute_vm(old, new)?;
        if !self.elements.contains_vm(new) {
            // `new` may have been minted elsewhere, e.g. by a plan producer.
            let _ = self.elements.claim_vm(new.id());
        }
        for v in self.views.values_mut() {
            v.substitute_vm(old, new);
        }
        self.attributes.substitute_vm(old, new);
        Ok(())
    }
}
