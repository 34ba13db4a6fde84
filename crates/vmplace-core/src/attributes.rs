//! Free-form per-element attributes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::element::{Element, Vm};

/// An attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(b) => write!(f, "{b}"),
            AttrValue::Int(i) => write!(f, "{i}"),
            AttrValue::Float(x) => write!(f, "{x}"),
            AttrValue::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Int(i)
    }
}

impl From<f64> for AttrValue {
    fn from(x: f64) -> Self {
        AttrValue::Float(x)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AttributeEntry {
    element: Element,
    values: BTreeMap<String, AttrValue>,
}

/// Key/value attributes attached to VMs and nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<AttributeEntry>", into = "Vec<AttributeEntry>")]
pub struct Attributes {
    values: BTreeMap<Element, BTreeMap<String, AttrValue>>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute. Returns the previous value, if any.
    pub fn put(&mut self, e: impl Into<Element>, key: impl Into<String>, value: impl Into<AttrValue>) -> Option<AttrValue> {
        self.values
            .entry(e.into())
            .or_default()
            .insert(key.into(), value.into())
    }

    pub fn get(&self, e: impl Into<Element>, key: &str) -> Option<&AttrValue> {
        self.values.get(&e.into()).and_then(|m| m.get(key))
    }

    pub fn get_bool(&self, e: impl Into<Element>, key: &str) -> Option<bool> {
        match self.get(e, key) {
            Some(AttrValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn get_int(&self, e: impl Into<Element>, key: &str) -> Option<i64> {
        match self.get(e, key) {
            Some(AttrValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn get_str(&self, e: impl Into<Element>, key: &str) -> Option<&str> {
        match self.get(e, key) {
            Some(AttrValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn remove(&mut self, e: impl Into<Element>, key: &str) -> Option<AttrValue> {
        let e = e.into();
        let m = self.values.get_mut(&e)?;
        let old = m.remove(key);
        if m.is_empty() {
            self.values.remove(&e);
        }
        old
    }

    /// Keys defined for an element.
    pub fn keys(&self, e: impl Into<Element>) -> Vec<&str> {
        self.values
            .get(&e.into())
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Elements having at least one attribute.
    pub fn defined(&self) -> impl Iterator<Item = &Element> {
        self.values.keys()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn substitute_vm(&mut self, old: Vm, new: Vm) {
        if let Some(m) = self.values.remove(&Element::Vm(old)) {
            self.values.insert(Element::Vm(new), m);
        }
    }
}

impl From<Vec<AttributeEntry>> for Attributes {
    fn from(entries: Vec<AttributeEntry>) -> Self {
        Self {
            values: entries.into_iter().map(|e| (e.element, e.values)).collect(),
        }
    }
}

impl From<Attributes> for Vec<AttributeEntry> {
    fn from(a: Attributes) -> Self {
        a.values
            .into_iter()
            .map(|(element, values)| AttributeEntry { element, values })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Node;

    #[test]
    fn typed_getters() {
        let mut a = Attributes::new();
        a.put(Vm::new(1), "boot", 5_i64);
        a.put(Vm::new(1), "template", "small");
        a.put(Node::new(1), "maintenance", true);
        assert_eq!(a.get_int(Vm::new(1), "boot"), Some(5));
        assert_eq!(a.get_str(Vm::new(1), "template"), Some("small"));
        assert_eq!(a.get_bool(Node::new(1), "maintenance"), Some(true));
        assert_eq!(a.get_bool(Vm::new(1), "boot"), None);
        assert_eq!(a.keys(Vm::new(1)), vec!["boot", "template"]);
    }

    #[test]
    fn remove_drops_empty_entries() {
        let mut a = Attributes::new();
        a.put(Vm::new(1), "k", 1_i64);
        assert_eq!(a.remove(Vm::new(1), "k"), Some(AttrValue::Int(1)));
        assert!(a.is_empty());
    }

    #[test]
    fn substitution_moves_attributes() {
        let mut a = Attributes::new();
        a.put(Vm::new(1), "k", "v");
        a.substitute_vm(Vm::new(1), Vm::new(2));
        assert_eq!(a.get_str(Vm::new(2), "k"), Some("v"));
        assert!(a.get(Vm::new(1), "k").is_none());
    }

    #[test]
    fn json_representation() {
        let mut a = Attributes::new();
        a.put(Node::new(3), "rack", "r1");
        let json = serde_json::to_string(&a).unwrap();
        let back: Attributes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }
}
