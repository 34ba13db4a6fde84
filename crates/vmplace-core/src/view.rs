//! Resource views attached to a model.
//!
//! A view is identified by a string key. [`ShareableResource`] is keyed by
//! its resource id (`"cpu"`, `"mem"`, ...), [`NamingService`] by
//! `"ns.vm"` or `"ns.node"`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::element::{Element, ElementKind, Node, Vm};
use crate::error::{ModelError, ModelResult};

/// Capacity of nodes and consumption of VMs for one resource.
///
/// Elements without an explicit value get the default capacity or
/// consumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareableResource {
    id: String,
    default_capacity: u32,
    default_consumption: u32,
    capacities: BTreeMap<Node, u32>,
    consumptions: BTreeMap<Vm, u32>,
}

impl ShareableResource {
    /// New resource where every element defaults to zero.
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_defaults(id, 0, 0)
    }

    pub fn with_defaults(id: impl Into<String>, default_capacity: u32, default_consumption: u32) -> Self {
        Self {
            id: id.into(),
            default_capacity,
            default_consumption,
            capacities: BTreeMap::new(),
            consumptions: BTreeMap::new(),
        }
    }

    /// Resource identifier, also used as the view identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn capacity(&self, n: Node) -> u32 {
        self.capacities.get(&n).copied().unwrap_or(self.default_capacity)
    }

    pub fn consumption(&self, vm: Vm) -> u32 {
        self.consumptions.get(&vm).copied().unwrap_or(self.default_consumption)
    }

    pub fn set_capacity(&mut self, n: Node, value: u32) -> &mut Self {
        self.capacities.insert(n, value);
        self
    }

    pub fn set_consumption(&mut self, vm: Vm, value: u32) -> &mut Self {
        self.consumptions.insert(vm, value);
        self
    }

    pub fn unset_capacity(&mut self, n: Node) {
        self.capacities.remove(&n);
    }

    pub fn unset_consumption(&mut self, vm: Vm) {
        self.consumptions.remove(&vm);
    }

    pub fn capacity_defined(&self, n: Node) -> bool {
        self.capacities.contains_key(&n)
    }

    pub fn consumption_defined(&self, vm: Vm) -> bool {
        self.consumptions.contains_key(&vm)
    }

    pub fn default_capacity(&self) -> u32 {
        self.default_capacity
    }

    pub fn default_consumption(&self) -> u32 {
        self.default_consumption
    }

    /// Total consumption of a set of VMs.
    pub fn sum_consumption<'a, I>(&self, vms: I) -> u64
    where
        I: IntoIterator<Item = &'a Vm>,
    {
        vms.into_iter().map(|v| u64::from(self.consumption(*v))).sum()
    }

    /// Total capacity of a set of nodes.
    pub fn sum_capacity<'a, I>(&self, nodes: I) -> u64
    where
        I: IntoIterator<Item = &'a Node>,
    {
        nodes.into_iter().map(|n| u64::from(self.capacity(*n))).sum()
    }

    /// Move the consumption of `old` to `new`.
    pub fn substitute_vm(&mut self, old: Vm, new: Vm) {
        if let Some(c) = self.consumptions.remove(&old) {
            self.consumptions.insert(new, c);
        }
    }
}

/// Serialized form of a [`NamingService`]; the reverse index is rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NamingRecord {
    kind: ElementKind,
    names: BTreeMap<String, Element>,
}

/// Bidirectional name registry for one kind of element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "NamingRecord", into = "NamingRecord")]
pub struct NamingService {
    kind: ElementKind,
    by_name: BTreeMap<String, Element>,
    by_element: BTreeMap<Element, String>,
}

impl NamingService {
    pub fn new(kind: ElementKind) -> Self {
        Self {
            kind,
            by_name: BTreeMap::new(),
            by_element: BTreeMap::new(),
        }
    }

    /// View identifier for a naming service of the given kind.
    pub fn view_id(kind: ElementKind) -> &'static str {
        match kind {
            ElementKind::Vm => "ns.vm",
            ElementKind::Node => "ns.node",
        }
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Bind a name. Fails if the element kind does not match, or if the
    /// name or the element is already bound.
    pub fn register(&mut self, name: impl Into<String>, e: impl Into<Element>) -> ModelResult<()> {
        let name = name.into();
        let e = e.into();
        let view = Self::view_id(self.kind).to_string();
        if e.kind() != self.kind {
            return Err(ModelError::InvalidViewValue {
                view,
                reason: format!("{e} is not a {:?}", self.kind),
            });
        }
        if self.by_name.contains_key(&name) || self.by_element.contains_key(&e) {
            return Err(ModelError::InvalidViewValue {
                view,
                reason: format!("'{name}' or {e} is already registered"),
            });
        }
        self.by_name.insert(name.clone(), e);
        self.by_element.insert(e, name);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Option<Element> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, e: impl Into<Element>) -> Option<&str> {
        self.by_element.get(&e.into()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn substitute_vm(&mut self, old: Vm, new: Vm) {
        if let Some(name) = self.by_element.remove(&Element::Vm(old)) {
            self.by_name.insert(name.clone(), Element::Vm(new));
            self.by_element.insert(Element::Vm(new), name);
        }
    }
}

impl From<NamingRecord> for NamingService {
    fn from(r: NamingRecord) -> Self {
        let by_element = r.names.iter().map(|(k, e)| (*e, k.clone())).collect();
        Self {
            kind: r.kind,
            by_name: r.names,
            by_element,
        }
    }
}

impl From<NamingService> for NamingRecord {
    fn from(ns: NamingService) -> Self {
        NamingRecord {
            kind: ns.kind,
            names: ns.by_name,
        }
    }
}

/// A view attached to a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum View {
    ShareableResource(ShareableResource),
    NamingService(NamingService),
}

impl View {
    /// Identifier under which the view is registered in a model.
    pub fn identifier(&self) -> String {
        match self {
            View::ShareableResource(rc) => rc.id().to_string(),
            View::NamingService(ns) => NamingService::view_id(ns.kind()).to_string(),
        }
    }

    pub fn substitute_vm(&mut self, old: Vm, new: Vm) {
        match self {
            View::ShareableResource(rc) => rc.substitute_vm(old, new),
            View::NamingService(ns) => ns.substitute_vm(old, new),
        }
    }

    pub fn as_resource(&self) -> Option<&ShareableResource> {
        match self {
            View::ShareableResource(rc) => Some(rc),
            View::NamingService(_) => None,
        }
    }

    pub fn as_resource_mut(&mut self) -> Option<&mut ShareableResource> {
        match self {
            View::ShareableResource(rc) => Some(rc),
            View::NamingService(_) => None,
        }
    }
}

impl From<ShareableResource> for View {
    fn from(rc: ShareableResource) -> Self {
        View::ShareableResource(rc)
    }
}

impl From<NamingService> for View {
    fn from(ns: NamingService) -> Self {
        View::NamingService(ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_unset_elements() {
        let mut rc = ShareableResource::with_defaults("cpu", 8, 1);
        rc.set_capacity(Node::new(1), 4).set_consumption(Vm::new(1), 3);
        assert_eq!(rc.capacity(Node::new(1)), 4);
        assert_eq!(rc.capacity(Node::new(2)), 8);
        assert_eq!(rc.consumption(Vm::new(1)), 3);
        assert_eq!(rc.consumption(Vm::new(2)), 1);
        assert!(rc.capacity_defined(Node::new(1)));
        rc.unset_capacity(Node::new(1));
        assert!(!rc.capacity_defined(Node::new(1)));
    }

    #[test]
    fn sums() {
        let mut rc = ShareableResource::new("mem");
        rc.set_consumption(Vm::new(1), 2).set_consumption(Vm::new(2), 5);
        rc.set_capacity(Node::new(1), 10).set_capacity(Node::new(2), 6);
        assert_eq!(rc.sum_consumption(&[Vm::new(1), Vm::new(2), Vm::new(3)]), 7);
        assert_eq!(rc.sum_capacity(&[Node::new(1), Node::new(2)]), 16);
    }

    #[test]
    fn substitution_moves_consumption() {
        let mut rc = ShareableResource::new("cpu");
        rc.set_consumption(Vm::new(1), 5);
        rc.substitute_vm(Vm::new(1), Vm::new(9));
        assert_eq!(rc.consumption(Vm::new(9)), 5);
        assert!(!rc.consumption_defined(Vm::new(1)));
    }

    #[test]
    fn naming_service_is_bidirectional() {
        let mut ns = NamingService::new(ElementKind::Vm);
        ns.register("web", Vm::new(1)).unwrap();
        assert_eq!(ns.resolve("web"), Some(Element::Vm(Vm::new(1))));
        assert_eq!(ns.name_of(Vm::new(1)), Some("web"));
        assert!(ns.register("web", Vm::new(2)).is_err());
        assert!(ns.register("n1", Node::new(1)).is_err());
        ns.substitute_vm(Vm::new(1), Vm::new(2));
        assert_eq!(ns.resolve("web"), Some(Element::Vm(Vm::new(2))));
        assert_eq!(ns.len(), 1);
    }

    #[test]
    fn view_identifiers() {
        let rc: View = ShareableResource::new("cpu").into();
        assert_eq!(rc.identifier(), "cpu");
        let ns: View = NamingService::new(ElementKind::Node).into();
        assert_eq!(ns.identifier(), "ns.node");
        assert!(ns.as_resource().is_none());
    }
}
