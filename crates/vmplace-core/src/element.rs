//! Element identity.
//!
//! VMs and nodes are opaque integer handles. The two kinds never compare
//! equal to each other, even when they share the same numeric id.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// A virtual machine handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vm(u32);

/// A physical host handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Node(u32);

impl Vm {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u32 {
        self.0
    }
}

impl Node {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vm#{}", self.0)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Kind tag of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Vm,
    Node,
}

/// Either a VM or a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Element {
    Vm(Vm),
    Node(Node),
}

impl Element {
    pub fn kind(&self) -> ElementKind {
        match self {
            Element::Vm(_) => ElementKind::Vm,
            Element::Node(_) => ElementKind::Node,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            Element::Vm(v) => v.id(),
            Element::Node(n) => n.id(),
        }
    }
}

impl From<Vm> for Element {
    fn from(v: Vm) -> Self {
        Element::Vm(v)
    }
}

impl From<Node> for Element {
    fn from(n: Node) -> Self {
        Element::Node(n)
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::Vm(v) => write!(f, "{v}"),
            Element::Node(n) => write!(f, "{n}"),
        }
    }
}

/// Monotonic generator of element identifiers.
///
/// Identifiers handed out by [`new_vm`](Self::new_vm) and
/// [`new_node`](Self::new_node) are never reused. Explicit ids can be
/// claimed with [`claim_vm`](Self::claim_vm) / [`claim_node`](Self::claim_node);
/// the generator then continues past the highest claimed id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementBuilder {
    next_vm: u32,
    next_node: u32,
    vms: BTreeSet<Vm>,
    nodes: BTreeSet<Node>,
}

impl ElementBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_vm(&mut self) -> Vm {
        while self.vms.contains(&Vm(self.next_vm)) {
            self.next_vm += 1;
        }
        let vm = Vm(self.next_vm);
        self.next_vm += 1;
        self.vms.insert(vm);
        vm
    }

    pub fn new_node(&mut self) -> Node {
        while self.nodes.contains(&Node(self.next_node)) {
            self.next_node += 1;
        }
        let node = Node(self.next_node);
        self.next_node += 1;
        self.nodes.insert(node);
        node
    }

    /// Register a VM with an explicit identifier.
    pub fn claim_vm(&mut self, id: u32) -> ModelResult<Vm> {
        let vm = Vm(id);
        if !self.vms.insert(vm) {
            return Err(ModelError::AlreadyRegistered(Element::Vm(vm)));
        }
        self.next_vm = self.next_vm.max(id.saturating_add(1));
        Ok(vm)
    }

    /// Register a node with an explicit identifier.
    pub fn claim_node(&mut self, id: u32) -> ModelResult<Node> {
        let node = Node(id);
        if !self.nodes.insert(node) {
            return Err(ModelError::AlreadyRegistered(Element::Node(node)));
        }
        self.next_node = self.next_node.max(id.saturating_add(1));
        Ok(node)
    }

    pub fn contains_vm(&self, vm: Vm) -> bool {
        self.vms.contains(&vm)
    }

    pub fn contains_node(&self, node: Node) -> bool {
        self.nodes.contains(&node)
    }
}
