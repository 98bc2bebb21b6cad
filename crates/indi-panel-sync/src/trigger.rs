//! The trigger trie behind [`Synchronizer`](crate::Synchronizer).
//!
//! The trie mirrors the registered selectors. Exact keys are named children;
//! a wildcard position holds a template that is cloned into one instance per
//! key observed in the data (the "applied-to" set) and torn down when that key
//! disappears. Listeners record the last `(serial, child_serial)` they saw at
//! their position, so firing is a pure serial comparison.

use std::collections::{BTreeMap, BTreeSet};

use indi_panel_core::{Serial, Step};
use indi_panel_store::Node;
use tracing::trace;

use crate::synchronizer::SyncToken;

/// What a trigger position last observed in the data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum Seen {
    #[default]
    Absent,
    Present { serial: Serial, child_serial: Serial },
}

impl Seen {
    pub(crate) fn of(node: Option<&Node>) -> Self {
        match node {
            None => Seen::Absent,
            Some(n) => Seen::Present {
                serial: n.serial(),
                child_serial: n.child_serial(),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct Listener {
    token: SyncToken,
    seen: Seen,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct TriggerNode {
    listeners: Vec<Listener>,
    named: BTreeMap<String, TriggerNode>,
    wildcard: Option<Box<Template>>,
    /// Data state at the last visit; an equal state skips the subtree.
    visited: Seen,
}

#[derive(Debug, Clone, Default)]
struct Template {
    pattern: TriggerNode,
    instances: BTreeMap<String, TriggerNode>,
}

impl TriggerNode {
    pub(crate) fn is_empty(&self) -> bool {
        self.listeners.is_empty() && self.named.is_empty() && self.wildcard.is_none()
    }

    /// Number of trie nodes, templates and instances included.
    pub(crate) fn node_count(&self) -> usize {
        1 + self.named.values().map(TriggerNode::node_count).sum::<usize>()
            + self.wildcard.as_ref().map_or(0, |t| {
                t.pattern.node_count()
                    + t.instances.values().map(TriggerNode::node_count).sum::<usize>()
            })
    }

    /// Keys currently instantiated for the wildcard under `path`.
    pub(crate) fn instances(&self, path: &[&str]) -> Vec<String> {
        let Some((key, rest)) = path.split_first() else {
            return self
                .wildcard
                .as_ref()
                .map(|t| t.instances.keys().cloned().collect())
                .unwrap_or_default();
        };
        let via_named = self.named.get(*key);
        let via_instance = self.wildcard.as_ref().and_then(|t| t.instances.get(*key));
        via_named
            .or(via_instance)
            .map(|child| child.instances(rest))
            .unwrap_or_default()
    }

    /// Register `token` at `steps` below this node.
    ///
    /// The listener starts from the current data state so it only fires for
    /// later changes. Instances a pre-existing template is missing keep their
    /// older listeners unprimed, so those still fire on the next pass.
    pub(crate) fn insert(&mut self, steps: &[Step], token: SyncToken, data: Option<&Node>) {
        match steps.split_first() {
            None => self.listeners.push(Listener {
                token,
                seen: Seen::of(data),
            }),
            Some((Step::Key(key), rest)) => {
                let child = self.named.entry(key.clone()).or_default();
                child.insert(rest, token, data.and_then(|d| d.child(key)));
            }
            Some((Step::Wildcard, rest)) => {
                let template = self.wildcard.get_or_insert_with(Default::default);
                let Template { pattern, instances } = &mut **template;
                if let Some(data) = data {
                    for key in data.keys() {
                        instances.entry(key).or_insert_with(|| pattern.clone());
                    }
                }
                pattern.insert(rest, token, None);
                for (key, instance) in instances.iter_mut() {
                    instance.insert(rest, token, data.and_then(|d| d.child(key)));
                }
            }
        }
    }

    /// Drop every listener of `token`. Returns whether this node is now empty.
    pub(crate) fn remove(&mut self, token: SyncToken) -> bool {
        self.listeners.retain(|l| l.token != token);
        self.named.retain(|_, child| !child.remove(token));

        let drop_template = match self.wildcard.as_deref_mut() {
            Some(Template { pattern, instances }) => {
                if pattern.remove(token) {
                    true
                } else {
                    for instance in instances.values_mut() {
                        instance.remove(token);
                    }
                    false
                }
            }
            None => false,
        };
        if drop_template {
            self.wildcard = None;
        }
        self.is_empty()
    }

    /// Compare the data against what every listener last saw, collecting the
    /// tokens that changed and keeping wildcard instances in step with the keys.
    pub(crate) fn visit(&mut self, data: Option<&Node>, fired: &mut BTreeSet<SyncToken>) {
        let current = Seen::of(data);
        if current == self.visited {
            return;
        }
        self.visited = current;

        for listener in &mut self.listeners {
            if listener.seen != current {
                listener.seen = current;
                fired.insert(listener.token);
            }
        }

        for (key, child) in &mut self.named {
            child.visit(data.and_then(|d| d.child(key)), fired);
        }

        if let Some(template) = self.wildcard.as_deref_mut() {
            let Template { pattern, instances } = template;
            let keys: BTreeSet<String> = data.map(Node::keys).unwrap_or_default().into_iter().collect();

            let gone: Vec<String> = instances
                .keys()
                .filter(|k| !keys.contains(*k))
                .cloned()
                .collect();
            for key in gone {
                if let Some(mut instance) = instances.remove(&key) {
                    instance.visit(None, fired);
                    trace!(key = %key, "wildcard instance dropped");
                }
            }

            for key in keys {
                let instance = instances.entry(key.clone()).or_insert_with(|| {
                    trace!(key = %key, "wildcard instance created");
                    pattern.clone()
                });
                instance.visit(data.and_then(|d| d.child(&key)), fired);
            }
        }
    }
}
