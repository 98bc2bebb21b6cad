//! Versioned tree nodes.
//!
//! Every node carries the serial of its last local mutation. Composite nodes
//! additionally carry `child_serial`, the highest serial of any descendant,
//! which lets readers skip unchanged subtrees without looking at values.

use std::collections::BTreeMap;

use indi_panel_core::Serial;
use serde_json::{Map, Value};

/// A node of the versioned tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    serial: Serial,
    child_serial: Serial,
    kind: NodeKind,
}

/// Storage kind of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Scalar(Value),
    Object(BTreeMap<String, Node>),
    Array(Vec<Node>),
}

impl Node {
    /// Build a subtree from a plain value, every node stamped with `serial`.
    pub fn build(value: &Value, serial: Serial) -> Self {
        let kind = match value {
            Value::Object(map) => NodeKind::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Node::build(v, serial)))
                    .collect(),
            ),
            Value::Array(items) => {
                NodeKind::Array(items.iter().map(|v| Node::build(v, serial)).collect())
            }
            scalar => NodeKind::Scalar(scalar.clone()),
        };
        Self {
            serial,
            child_serial: serial,
            kind,
        }
    }

    /// An empty object node.
    pub fn empty_object(serial: Serial) -> Self {
        Self {
            serial,
            child_serial: serial,
            kind: NodeKind::Object(BTreeMap::new()),
        }
    }

    /// Serial of the last wholesale replacement or scalar change of this node.
    pub fn serial(&self) -> Serial {
        self.serial
    }

    /// Highest serial of this node or any descendant.
    pub fn child_serial(&self) -> Serial {
        self.child_serial
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_composite(&self) -> bool {
        !matches!(self.kind, NodeKind::Scalar(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, NodeKind::Array(_))
    }

    /// The scalar value, if this is a scalar node.
    pub fn as_scalar(&self) -> Option<&Value> {
        match &self.kind {
            NodeKind::Scalar(v) => Some(v),
            _ => None,
        }
    }

    /// Direct child by key. Array children are addressed by decimal index.
    pub fn child(&self, key: &str) -> Option<&Node> {
        match &self.kind {
            NodeKind::Scalar(_) => None,
            NodeKind::Object(children) => children.get(key),
            NodeKind::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        }
    }

    /// Descendant at `path`.
    pub fn descendant(&self, path: &[&str]) -> Option<&Node> {
        path.iter().try_fold(self, |node, key| node.child(key))
    }

    /// Keys of the direct children, in iteration order.
    pub fn keys(&self) -> Vec<String> {
        match &self.kind {
            NodeKind::Scalar(_) => Vec::new(),
            NodeKind::Object(children) => children.keys().cloned().collect(),
            NodeKind::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
        }
    }

    /// Direct children with their keys.
    pub fn entries(&self) -> Vec<(String, &Node)> {
        match &self.kind {
            NodeKind::Scalar(_) => Vec::new(),
            NodeKind::Object(children) => children.iter().map(|(k, n)| (k.clone(), n)).collect(),
            NodeKind::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, n)| (i.to_string(), n))
                .collect(),
        }
    }

    /// Number of direct children.
    pub fn len(&self) -> usize {
        match &self.kind {
            NodeKind::Scalar(_) => 0,
            NodeKind::Object(children) => children.len(),
            NodeKind::Array(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize the plain value of this subtree.
    pub fn to_value(&self) -> Value {
        match &self.kind {
            NodeKind::Scalar(v) => v.clone(),
            NodeKind::Object(children) => {
                let mut map = Map::new();
                for (k, n) in children {
                    map.insert(k.clone(), n.to_value());
                }
                Value::Object(map)
            }
            NodeKind::Array(items) => Value::Array(items.iter().map(Node::to_value).collect()),
        }
    }

    /// Check that every composite's `child_serial` covers its descendants.
    pub fn serials_consistent(&self) -> bool {
        if self.child_serial < self.serial {
            return false;
        }
        match &self.kind {
            NodeKind::Scalar(_) => self.child_serial == self.serial,
            NodeKind::Object(_) | NodeKind::Array(_) => self.entries().into_iter().all(|(_, c)| {
                c.serial <= self.child_serial
                    && c.child_serial <= self.child_serial
                    && c.serials_consistent()
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutation (crate-private: all writes go through the store's tick)
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    /// Record that something beneath this node changed at `serial`.
    pub(crate) fn bubble(&mut self, serial: Serial) {
        debug_assert!(serial >= self.child_serial, "child serial moved backwards");
        self.child_serial = self.child_serial.max(serial);
    }

    /// Mark this node itself as replaced at `serial`.
    pub(crate) fn stamp(&mut self, serial: Serial) {
        debug_assert!(serial >= self.serial, "serial moved backwards");
        self.serial = serial;
        self.child_serial = self.child_serial.max(serial);
    }

    /// Merge `value` into this node.
    ///
    /// Scalars only change if the value differs. Same-kind containers are
    /// merged key by key, dropping keys absent from `value`. A kind change
    /// (scalar, object, array) rebuilds the node. Returns whether anything
    /// changed.
    pub(crate) fn assign(&mut self, value: &Value, serial: Serial) -> bool {
        match value {
            Value::Object(map) => {
                if let NodeKind::Object(children) = &mut self.kind {
                    let before = children.len();
                    children.retain(|k, _| map.contains_key(k));
                    let mut changed = children.len() != before;

                    for (k, v) in map {
                        match children.get_mut(k) {
                            Some(child) => changed |= child.assign(v, serial),
                            None => {
                                children.insert(k.clone(), Node::build(v, serial));
                                changed = true;
                            }
                        }
                    }
                    if changed {
                        self.bubble(serial);
                    }
                    return changed;
                }
            }
            Value::Array(values) => {
                if let NodeKind::Array(items) = &mut self.kind {
                    let mut changed = false;
                    if items.len() > values.len() {
                        items.truncate(values.len());
                        changed = true;
                    }
                    for (item, v) in items.iter_mut().zip(values) {
                        changed |= item.assign(v, serial);
                    }
                    for v in values.iter().skip(items.len()) {
                        items.push(Node::build(v, serial));
                        changed = true;
                    }
                    if changed {
                        self.bubble(serial);
                    }
                    return changed;
                }
            }
            scalar => {
                if let NodeKind::Scalar(current) = &mut self.kind {
                    if current == scalar {
                        return false;
                    }
                    *current = scalar.clone();
                    self.stamp(serial);
                    return true;
                }
            }
        }

        *self = Node::build(value, serial);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_stamps_every_node() {
        let node = Node::build(&json!({"a": [1, {"b": 2}]}), 7);
        assert_eq!(node.serial(), 7);
        assert_eq!(node.descendant(&["a", "1", "b"]).unwrap().serial(), 7);
        assert!(node.serials_consistent());
    }

    #[test]
    fn test_assign_same_scalar_is_noop() {
        let mut node = Node::build(&json!("x"), 1);
        assert!(!node.assign(&json!("x"), 2));
        assert_eq!(node.serial(), 1);
        assert!(node.assign(&json!("y"), 3));
        assert_eq!(node.serial(), 3);
    }

    #[test]
    fn test_assign_object_merges_and_prunes() {
        let mut node = Node::build(&json!({"keep": 1, "drop": 2, "same": 3}), 1);
        assert!(node.assign(&json!({"keep": 10, "same": 3, "new": 4}), 2));

        assert_eq!(node.to_value(), json!({"keep": 10, "same": 3, "new": 4}));
        assert_eq!(node.serial(), 1, "merge does not replace the container");
        assert_eq!(node.child_serial(), 2);
        assert_eq!(node.child("same").unwrap().serial(), 1);
        assert_eq!(node.child("keep").unwrap().serial(), 2);
    }

    #[test]
    fn test_assign_kind_change_rebuilds() {
        let mut node = Node::build(&json!({"a": 1}), 1);
        assert!(node.assign(&json!([1]), 5));
        assert!(node.is_array());
        assert_eq!(node.serial(), 5);
    }

    #[test]
    fn test_assign_array_truncates_and_extends() {
        let mut node = Node::build(&json!([1, 2, 3]), 1);
        assert!(node.assign(&json!([1, 5]), 2));
        assert_eq!(node.to_value(), json!([1, 5]));
        assert!(node.assign(&json!([1, 5, 6]), 3));
        assert_eq!(node.to_value(), json!([1, 5, 6]));
        assert_eq!(node.child("0").unwrap().serial(), 1);
        assert!(node.serials_consistent());
    }

    #[test]
    fn test_keys_and_entries_for_arrays() {
        let node = Node::build(&json!(["a", "b"]), 1);
        assert_eq!(node.keys(), vec!["0".to_string(), "1".to_string()]);
        assert_eq!(node.child("1").unwrap().as_scalar(), Some(&json!("b")));
        assert!(node.child("x").is_none());
    }
}
