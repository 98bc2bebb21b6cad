//! The versioned store.
//!
//! A single-writer tree of [`Node`]s addressed by path. Mutations issued
//! within one tick share one serial drawn from the injected [`SerialClock`];
//! the owner closes the tick with [`Store::end_tick`] and then runs one
//! synchronizer pass for the whole batch.

use std::cell::Cell;

use indi_panel_core::{Diff, Serial, SerialClock, Whitelist};
use serde_json::Value;
use tracing::trace;

use crate::error::{display_path, Result, StoreError};
use crate::node::{Node, NodeKind};
use crate::snapshot::{self, Snapshot};

/// In-memory versioned tree.
///
/// `Store` is `Send` but not `Sync`: share it behind a mutex and keep exactly
/// one writer.
#[derive(Debug)]
pub struct Store {
    root: Node,
    clock: SerialClock,
    /// Serial of the open tick. Reading serials seals the tick so that later
    /// writes cannot hide behind a serial a reader already recorded.
    tick: Cell<Option<Serial>>,
    /// Mutations happened since the last `end_tick`.
    dirty: bool,
}

impl Store {
    /// Create an empty store (root is `{}` with serial 0).
    pub fn new(clock: SerialClock) -> Self {
        Self {
            root: Node::empty_object(0),
            clock,
            tick: Cell::new(None),
            dirty: false,
        }
    }

    /// The clock this store draws serials from.
    pub fn clock(&self) -> &SerialClock {
        &self.clock
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Node at `path`, if present.
    pub fn node(&self, path: &[&str]) -> Option<&Node> {
        self.root.descendant(path)
    }

    /// Plain value at `path`, if present.
    pub fn get(&self, path: &[&str]) -> Option<Value> {
        self.node(path).map(Node::to_value)
    }

    pub fn contains(&self, path: &[&str]) -> bool {
        self.node(path).is_some()
    }

    /// Whether mutations are waiting for a synchronizer pass.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Close the current tick. Returns `true` if anything changed during it.
    pub fn end_tick(&mut self) -> bool {
        self.tick.set(None);
        std::mem::take(&mut self.dirty)
    }

    /// Seal the open tick without clearing the dirty flag.
    pub fn seal(&self) {
        self.tick.set(None);
    }

    fn tick_serial(&self) -> Serial {
        match self.tick.get() {
            Some(serial) => serial,
            None => {
                let serial = self.clock.next();
                self.tick.set(Some(serial));
                serial
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Write `value` at `path`, creating intermediate objects as needed.
    ///
    /// Composite values merge into the existing node (keys absent from
    /// `value` are removed); a storage-kind change rebuilds the node. Returns
    /// whether anything changed.
    pub fn set(&mut self, path: &[&str], value: &Value) -> Result<bool> {
        let serial = self.tick_serial();
        let changed = set_at(&mut self.root, path, 0, value, serial)?;
        if changed {
            self.dirty = true;
        }
        Ok(changed)
    }

    /// Remove the node at `path`. Returns whether it existed.
    ///
    /// Removing an array element shifts the following elements, so the array
    /// node itself is marked as replaced.
    pub fn remove(&mut self, path: &[&str]) -> Result<bool> {
        if path.is_empty() {
            return Err(StoreError::invalid(path, "cannot remove the root"));
        }
        let serial = self.tick_serial();
        let removed = remove_at(&mut self.root, path, 0, serial)?;
        if removed {
            trace!(path = %display_path(path), serial, "node removed");
            self.dirty = true;
        }
        Ok(removed)
    }

    /// Mark the node at `path` as replaced without changing its value.
    ///
    /// Downstream diffs re-materialize the whole subtree. Returns whether the
    /// node exists.
    pub fn touch(&mut self, path: &[&str]) -> bool {
        if self.node(path).is_none() {
            return false;
        }
        let serial = self.tick_serial();
        touch_at(&mut self.root, path, serial);
        trace!(path = %display_path(path), serial, "node touched");
        self.dirty = true;
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Snapshots and diffs
    // ─────────────────────────────────────────────────────────────────────────

    /// Capture the serials of every whitelisted node.
    pub fn take_snapshot(&self, whitelist: &Whitelist) -> Snapshot {
        self.seal();
        Snapshot::capture(&self.root, whitelist)
    }

    /// Compute what changed since `cursor` and advance it.
    ///
    /// Returns `None` when nothing beneath the root changed, so two calls in a
    /// row without a mutation in between yield `None` the second time.
    pub fn diff(&self, cursor: &mut Snapshot, whitelist: &Whitelist) -> Option<Diff> {
        self.seal();
        snapshot::diff_node(&self.root, cursor, whitelist)
    }
}

fn set_at(node: &mut Node, path: &[&str], depth: usize, value: &Value, serial: Serial) -> Result<bool> {
    let Some(key) = path.get(depth) else {
        return Ok(node.assign(value, serial));
    };

    let mut changed = false;
    if !node.is_composite() {
        *node = Node::empty_object(serial);
        changed = true;
    }

    changed |= match node.kind_mut() {
        NodeKind::Object(children) => match children.get_mut(*key) {
            Some(child) => set_at(child, path, depth + 1, value, serial)?,
            None => {
                children.insert(key.to_string(), build_path(&path[depth + 1..], value, serial));
                true
            }
        },
        NodeKind::Array(items) => {
            let index = parse_index(path, depth)?;
            if index < items.len() {
                set_at(&mut items[index], path, depth + 1, value, serial)?
            } else if index == items.len() {
                items.push(build_path(&path[depth + 1..], value, serial));
                true
            } else {
                return Err(StoreError::IndexOutOfRange {
                    path: display_path(&path[..depth]),
                    index,
                    len: items.len(),
                });
            }
        }
        NodeKind::Scalar(_) => {
            return Err(StoreError::invalid(&path[..=depth], "scalar in the middle of a path"))
        }
    };

    if changed {
        node.bubble(serial);
    }
    Ok(changed)
}

fn build_path(rest: &[&str], value: &Value, serial: Serial) -> Node {
    let mut node = Node::build(value, serial);
    for key in rest.iter().rev() {
        let mut parent = Node::empty_object(serial);
        if let NodeKind::Object(children) = parent.kind_mut() {
            children.insert(key.to_string(), node);
        }
        node = parent;
    }
    node
}

fn remove_at(node: &mut Node, path: &[&str], depth: usize, serial: Serial) -> Result<bool> {
    let key = path[depth];
    let last = depth + 1 == path.len();

    let removed = match node.kind_mut() {
        NodeKind::Scalar(_) => return Ok(false),
        NodeKind::Object(children) => {
            if last {
                children.remove(key).is_some()
            } else {
                match children.get_mut(key) {
                    Some(child) => remove_at(child, path, depth + 1, serial)?,
                    None => false,
                }
            }
        }
        NodeKind::Array(items) => {
            let index = parse_index(path, depth)?;
            if index >= items.len() {
                false
            } else if last {
                items.remove(index);
                node.stamp(serial);
                return Ok(true);
            } else {
                remove_at(&mut items[index], path, depth + 1, serial)?
            }
        }
    };

    if removed {
        node.bubble(serial);
    }
    Ok(removed)
}

fn touch_at(node: &mut Node, path: &[&str], serial: Serial) {
    match path.split_first() {
        None => node.stamp(serial),
        Some((key, rest)) => {
            let child = match node.kind_mut() {
                NodeKind::Object(children) => children.get_mut(*key),
                NodeKind::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
                NodeKind::Scalar(_) => None,
            };
            if let Some(child) = child {
                touch_at(child, rest, serial);
                node.bubble(serial);
            }
        }
    }
}

fn parse_index(path: &[&str], depth: usize) -> Result<usize> {
    path[depth]
        .parse()
        .map_err(|_| StoreError::invalid(&path[..=depth], "array index must be a decimal integer"))
}
