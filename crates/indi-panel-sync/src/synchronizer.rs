//! Path-selective change callbacks.
//!
//! A [`Synchronizer`] holds callbacks registered against [`PathSpec`]
//! selectors. After each batch of mutations the owner runs one pass: the
//! trigger trie is compared against the store and every callback whose watched
//! subtree changed is invoked exactly once, in registration order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use indi_panel_core::PathSpec;
use indi_panel_store::Store;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::trigger::TriggerNode;

/// Handle returned by [`Synchronizer::add`]; pass it to [`Synchronizer::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncToken(u64);

impl fmt::Display for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sync#{}", self.0)
    }
}

/// A synchronizer callback. It may mutate the store; those mutations are
/// picked up by the next pass of the same commit.
pub type Callback = Box<dyn FnMut(&mut Store) -> anyhow::Result<()> + Send>;

/// Registry of callbacks plus the trigger trie they hang off.
pub struct Synchronizer {
    root: TriggerNode,
    callbacks: BTreeMap<SyncToken, Callback>,
    next_token: u64,
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("callbacks", &self.callbacks.len())
            .field("trigger_nodes", &self.root.node_count())
            .finish()
    }
}

impl Synchronizer {
    pub fn new() -> Self {
        Self {
            root: TriggerNode::default(),
            callbacks: BTreeMap::new(),
            next_token: 1,
        }
    }

    /// Register `callback` for every path `spec` expands to.
    ///
    /// The callback fires on later changes only, unless
    /// `force_initial_trigger` is set, in which case it runs once right away.
    pub fn add<F>(
        &mut self,
        store: &mut Store,
        spec: &PathSpec,
        callback: F,
        force_initial_trigger: bool,
    ) -> Result<SyncToken>
    where
        F: FnMut(&mut Store) -> anyhow::Result<()> + Send + 'static,
    {
        let paths = spec.expand();
        if paths.is_empty() {
            return Err(SyncError::EmptySelector);
        }

        let token = SyncToken(self.next_token);
        self.next_token += 1;

        store.seal();
        for steps in &paths {
            self.root.insert(steps, token, Some(store.root()));
        }
        debug!(token = %token, paths = paths.len(), "synchronizer added");

        let mut callback: Callback = Box::new(callback);
        if force_initial_trigger {
            invoke(token, &mut callback, store);
        }
        self.callbacks.insert(token, callback);
        Ok(token)
    }

    /// Unregister a callback and prune the trigger nodes it leaves empty.
    /// Returns whether the token was known.
    pub fn remove(&mut self, token: SyncToken) -> bool {
        if self.callbacks.remove(&token).is_none() {
            return false;
        }
        self.root.remove(token);
        debug!(token = %token, "synchronizer removed");
        true
    }

    /// Tokens whose watched subtree changed since their last observation.
    ///
    /// Advances every listener's recorded state, so a second call without
    /// mutations in between returns nothing.
    pub fn collect(&mut self, store: &Store) -> Vec<SyncToken> {
        store.seal();
        let mut fired = BTreeSet::new();
        self.root.visit(Some(store.root()), &mut fired);
        fired.into_iter().collect()
    }

    /// One pass: collect, then invoke each fired callback once.
    ///
    /// A failing callback is logged and does not stop the others. Returns the
    /// number of callbacks invoked.
    pub fn run(&mut self, store: &mut Store) -> usize {
        let fired = self.collect(store);
        for token in &fired {
            if let Some(callback) = self.callbacks.get_mut(token) {
                invoke(*token, callback, store);
            }
        }
        fired.len()
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Size of the trigger trie, root included.
    pub fn trigger_nodes(&self) -> usize {
        self.root.node_count()
    }

    /// Keys currently instantiated for the wildcard directly under `path`.
    pub fn wildcard_instances(&self, path: &[&str]) -> Vec<String> {
        self.root.instances(path)
    }
}

fn invoke(token: SyncToken, callback: &mut Callback, store: &mut Store) {
    if let Err(err) = callback(store) {
        warn!(token = %token, error = %err, "synchronizer callback failed");
    }
}
