//! Diff fan-out to replication clients.
//!
//! Each attached client owns a [`Snapshot`] cursor and a whitelist. After
//! every commit the replicator diffs the store against each cursor and pushes
//! the result down the client's channel. The transport that forwards those
//! diffs over the network lives outside this crate.

use std::collections::BTreeMap;
use std::fmt;

use indi_panel_core::{apply_diff, Diff, Whitelist};
use indi_panel_store::{Snapshot, Store};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{Result, SyncError};

/// Identifies one replication client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

struct Client {
    whitelist: Whitelist,
    cursor: Snapshot,
    tx: mpsc::UnboundedSender<Diff>,
}

/// Per-client cursors and outbound diff channels.
#[derive(Default)]
pub struct Replicator {
    clients: BTreeMap<ClientId, Client>,
    next_id: u64,
}

impl fmt::Debug for Replicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replicator")
            .field("clients", &self.clients.len())
            .finish()
    }
}

impl Replicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a client. The first diff, queued immediately, is a full
    /// `newObject` of everything `whitelist` lets through.
    pub fn attach(
        &mut self,
        store: &Store,
        whitelist: Whitelist,
    ) -> (ClientId, mpsc::UnboundedReceiver<Diff>) {
        self.next_id += 1;
        let id = ClientId(self.next_id);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut cursor = Snapshot::unseen();
        if let Some(initial) = store.diff(&mut cursor, &whitelist) {
            let _ = tx.send(initial);
        }
        self.clients.insert(id, Client { whitelist, cursor, tx });
        info!(client = %id, "replication client attached");
        (id, rx)
    }

    /// Detach a client and drop its cursor.
    pub fn detach(&mut self, id: ClientId) -> Result<()> {
        self.clients.remove(&id).ok_or(SyncError::UnknownClient(id))?;
        info!(client = %id, "replication client detached");
        Ok(())
    }

    /// Diff every client against the store and send what changed.
    ///
    /// Clients whose receiver is gone are detached. Returns the number of
    /// diffs sent.
    pub fn publish(&mut self, store: &Store) -> usize {
        let mut sent = 0;
        self.clients.retain(|id, client| {
            let Some(diff) = store.diff(&mut client.cursor, &client.whitelist) else {
                return true;
            };
            if client.tx.send(diff).is_err() {
                debug!(client = %id, "replication receiver dropped");
                return false;
            }
            sent += 1;
            true
        });
        sent
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Client-side mirror rebuilt from received diffs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplicaCopy {
    value: Option<Value>,
}

impl ReplicaCopy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one diff on top of the current copy.
    pub fn apply(&mut self, diff: &Diff) -> Result<&Value> {
        let next = apply_diff(self.value.as_ref(), diff)?;
        Ok(self.value.insert(next))
    }

    /// The current copy, once a first diff has arrived.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indi_panel_core::SerialClock;
    use serde_json::json;

    #[test]
    fn test_attach_sends_full_object() {
        let mut store = Store::new(SerialClock::new());
        store.set(&["a"], &json!({"b": 1})).unwrap();
        store.end_tick();

        let mut replicator = Replicator::new();
        let (_, mut rx) = replicator.attach(&store, Whitelist::All);
        let first = rx.try_recv().unwrap();
        assert_eq!(first.to_json(), json!({"newObject": {"a": {"newObject": {"b": 1}}}}));
    }

    #[test]
    fn test_publish_keeps_replica_in_step() {
        let mut store = Store::new(SerialClock::new());
        let mut replicator = Replicator::new();
        let (_, mut rx) = replicator.attach(&store, Whitelist::All);
        let mut replica = ReplicaCopy::new();
        replica.apply(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(replica.value(), Some(&json!({})));

        store.set(&["a"], &json!([1, 2, 3])).unwrap();
        store.end_tick();
        assert_eq!(replicator.publish(&store), 1);
        replica.apply(&rx.try_recv().unwrap()).unwrap();

        store.set(&["a"], &json!([1, 5])).unwrap();
        store.set(&["b"], &json!("x")).unwrap();
        store.end_tick();
        replicator.publish(&store);
        replica.apply(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(replica.value(), store.get(&[]).as_ref());

        assert_eq!(replicator.publish(&store), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_detaches_client() {
        let mut store = Store::new(SerialClock::new());
        let mut replicator = Replicator::new();
        let (id, rx) = replicator.attach(&store, Whitelist::All);
        drop(rx);

        store.set(&["a"], &json!(1)).unwrap();
        store.end_tick();
        assert_eq!(replicator.publish(&store), 0);
        assert!(replicator.is_empty());
        assert!(matches!(replicator.detach(id), Err(SyncError::UnknownClient(gone)) if gone == id));
    }

    #[test]
    fn test_whitelisted_client_sees_only_its_fields() {
        let mut store = Store::new(SerialClock::new());
        let mut replicator = Replicator::new();
        let (_, mut rx) = replicator.attach(&store, Whitelist::fields([("ui", Whitelist::All)]));
        let mut replica = ReplicaCopy::new();
        replica.apply(&rx.try_recv().unwrap()).unwrap();

        store.set(&["ui", "x"], &json!(1)).unwrap();
        store.set(&["secret"], &json!(2)).unwrap();
        store.end_tick();
        replicator.publish(&store);
        replica.apply(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(replica.value(), Some(&json!({"ui": {"x": 1}})));
    }
}
