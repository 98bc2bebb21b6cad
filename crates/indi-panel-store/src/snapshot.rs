//! Per-consumer serial snapshots and the diff algorithm.
//!
//! A [`Snapshot`] records the serials a consumer has already seen. Each call
//! to [`Store::diff`](crate::Store::diff) compares the live tree against it,
//! emits the minimal [`Diff`] and advances the snapshot in place. Snapshots
//! belong to one consumer and are never shared.

use std::collections::BTreeMap;

use indi_panel_core::{Diff, Serial, Whitelist};

use crate::node::{Node, NodeKind};

/// Serial used by [`Snapshot::unseen`]; never produced by a clock.
const UNSEEN: Serial = Serial::MAX;

/// Recursive record of `(serial, child_serial)` per whitelisted node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    serial: Serial,
    child_serial: Serial,
    props: BTreeMap<String, Snapshot>,
}

impl Snapshot {
    /// A cursor that has seen nothing: the first diff is a full `newObject`.
    pub fn unseen() -> Self {
        Self {
            serial: UNSEEN,
            child_serial: UNSEEN,
            props: BTreeMap::new(),
        }
    }

    pub(crate) fn capture(node: &Node, whitelist: &Whitelist) -> Self {
        let mut props = BTreeMap::new();
        for (key, child) in node.entries() {
            if let Some(rule) = child_rule(node, whitelist, &key) {
                props.insert(key, Snapshot::capture(child, rule));
            }
        }
        Self {
            serial: node.serial(),
            child_serial: node.child_serial(),
            props,
        }
    }

    pub fn serial(&self) -> Serial {
        self.serial
    }

    pub fn child_serial(&self) -> Serial {
        self.child_serial
    }

    /// Snapshot of a direct child, if it was captured.
    pub fn prop(&self, key: &str) -> Option<&Snapshot> {
        self.props.get(key)
    }
}

/// Whitelist rule for `key` under `node`. Array elements inherit the array's rule.
fn child_rule<'w>(node: &Node, whitelist: &'w Whitelist, key: &str) -> Option<&'w Whitelist> {
    if node.is_array() {
        match whitelist {
            Whitelist::Nothing => None,
            rule => Some(rule),
        }
    } else {
        whitelist.child(key)
    }
}

fn child_visible(node: &Node, whitelist: &Whitelist, key: &str) -> bool {
    if node.is_array() {
        *whitelist != Whitelist::Nothing
    } else {
        whitelist.accepts(key)
    }
}

/// Full materialization of `node` under `whitelist`.
pub(crate) fn materialize(node: &Node, whitelist: &Whitelist) -> Diff {
    match node.kind() {
        NodeKind::Scalar(v) => Diff::Value(v.clone()),
        NodeKind::Object(children) => Diff::NewObject(
            children
                .iter()
                .filter_map(|(k, child)| {
                    whitelist
                        .child(k)
                        .map(|rule| (k.clone(), materialize(child, rule)))
                })
                .collect(),
        ),
        NodeKind::Array(items) => {
            Diff::NewArray(items.iter().map(|item| materialize(item, whitelist)).collect())
        }
    }
}

pub(crate) fn diff_node(node: &Node, cursor: &mut Snapshot, whitelist: &Whitelist) -> Option<Diff> {
    if node.serial() != cursor.serial {
        *cursor = Snapshot::capture(node, whitelist);
        return Some(materialize(node, whitelist));
    }

    if node.child_serial() == cursor.child_serial {
        return None;
    }
    debug_assert!(
        node.child_serial() > cursor.child_serial,
        "child serial moved backwards: {} < {}",
        node.child_serial(),
        cursor.child_serial
    );

    let mut delete = Vec::new();
    cursor.props.retain(|key, _| {
        let keep = node.child(key).is_some() && child_visible(node, whitelist, key);
        if !keep {
            delete.push(key.clone());
        }
        keep
    });

    let mut update = BTreeMap::new();
    for (key, child) in node.entries() {
        let Some(rule) = child_rule(node, whitelist, &key) else {
            continue;
        };
        match cursor.props.get_mut(&key) {
            Some(child_cursor) => {
                if let Some(d) = diff_node(child, child_cursor, rule) {
                    update.insert(key, d);
                }
            }
            None => {
                cursor.props.insert(key.clone(), Snapshot::capture(child, rule));
                update.insert(key, materialize(child, rule));
            }
        }
    }

    cursor.child_serial = node.child_serial();
    let diff = Diff::Update { update, delete };
    (!diff.is_empty_update()).then_some(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use indi_panel_core::{apply_diff, SerialClock};
    use serde_json::json;

    fn store() -> Store {
        Store::new(SerialClock::new())
    }

    #[test]
    fn test_worked_example() {
        let mut store = store();
        store.set(&["a", "b"], &json!(1)).unwrap();
        store.end_tick();
        assert_eq!(store.node(&["a", "b"]).unwrap().serial(), 1);

        let mut cursor = store.take_snapshot(&Whitelist::All);
        assert_eq!(cursor.prop("a").unwrap().serial(), 1);

        store.set(&["a", "b"], &json!(2)).unwrap();
        store.end_tick();

        let diff = store.diff(&mut cursor, &Whitelist::All).unwrap();
        assert_eq!(diff.to_json(), json!({"update": {"a": {"update": {"b": 2}}}}));

        let client = apply_diff(Some(&json!({"a": {"b": 1}})), &diff).unwrap();
        assert_eq!(client, json!({"a": {"b": 2}}));
    }

    #[test]
    fn test_diff_is_idempotent() {
        let mut store = store();
        store.set(&["a"], &json!({"x": 1})).unwrap();
        let mut cursor = Snapshot::unseen();

        assert!(store.diff(&mut cursor, &Whitelist::All).is_some());
        assert!(store.diff(&mut cursor, &Whitelist::All).is_none());
    }

    #[test]
    fn test_unseen_cursor_gets_full_object() {
        let mut store = store();
        store.set(&["a"], &json!({"x": [1, 2]})).unwrap();

        let mut cursor = Snapshot::unseen();
        let diff = store.diff(&mut cursor, &Whitelist::All).unwrap();
        assert_eq!(
            diff.to_json(),
            json!({"newObject": {"a": {"newObject": {"x": {"newArray": {"0": 1, "1": 2}}}}}})
        );
    }

    #[test]
    fn test_removed_keys_are_deleted() {
        let mut store = store();
        store.set(&[], &json!({"a": 1, "b": 2})).unwrap();
        let mut cursor = store.take_snapshot(&Whitelist::All);

        store.remove(&["b"]).unwrap();
        let diff = store.diff(&mut cursor, &Whitelist::All).unwrap();
        assert_eq!(diff.to_json(), json!({"update": {}, "delete": ["b"]}));
    }

    #[test]
    fn test_replaced_subtree_is_new_object() {
        let mut store = store();
        store.set(&["a"], &json!({"x": 1})).unwrap();
        let mut cursor = store.take_snapshot(&Whitelist::All);

        store.set(&["a"], &json!([1])).unwrap();
        let diff = store.diff(&mut cursor, &Whitelist::All).unwrap();
        assert_eq!(diff.to_json(), json!({"update": {"a": {"newArray": {"0": 1}}}}));
    }

    #[test]
    fn test_whitelist_filters_and_deletes() {
        let mut store = store();
        store.set(&[], &json!({"public": {"a": 1}, "private": {"b": 2}})).unwrap();

        let wl = Whitelist::fields([("public", Whitelist::All)]);
        let mut cursor = Snapshot::unseen();
        let diff = store.diff(&mut cursor, &wl).unwrap();
        assert_eq!(diff.to_json(), json!({"newObject": {"public": {"newObject": {"a": 1}}}}));

        store.set(&["private", "b"], &json!(3)).unwrap();
        assert!(store.diff(&mut cursor, &wl).is_none());

        // Narrowing the whitelist deletes what is no longer visible.
        store.set(&["public", "a"], &json!(5)).unwrap();
        let diff = store.diff(&mut cursor, &Whitelist::fields([("other", Whitelist::All)]));
        assert_eq!(diff.unwrap().to_json(), json!({"update": {}, "delete": ["public"]}));
    }

    #[test]
    fn test_touch_rematerializes() {
        let mut store = store();
        store.set(&["a", "b"], &json!(1)).unwrap();
        let mut cursor = store.take_snapshot(&Whitelist::All);

        store.touch(&["a"]);
        let diff = store.diff(&mut cursor, &Whitelist::All).unwrap();
        assert_eq!(diff.to_json(), json!({"update": {"a": {"newObject": {"b": 1}}}}));
    }
}
