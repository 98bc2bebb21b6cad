//! Algebraic laws of the store, diff engine and synchronizer, checked over
//! random mutation sequences.

use proptest::prelude::*;
use serde_json::Value;

use indi_panel_core::{apply_diff, PathSpec, SerialClock, Whitelist};
use indi_panel_store::{Snapshot, Store};
use indi_panel_sync::{SyncToken, Synchronizer};
use indi_panel_testkit::generators::{as_strs, op_batches, path, whitelist};

fn fingerprint(store: &Store, path: &[String]) -> Option<(u64, u64)> {
    store
        .node(&as_strs(path))
        .map(|n| (n.serial(), n.child_serial()))
}

proptest! {
    /// A client that applies every diff holds the filtered store.
    #[test]
    fn prop_replica_matches_filtered_store(batches in op_batches(), wl in whitelist()) {
        let mut store = Store::new(SerialClock::new());
        let mut cursor = Snapshot::unseen();
        let mut replica: Option<Value> = None;

        for batch in batches {
            for op in &batch {
                op.apply(&mut store);
            }
            if let Some(diff) = store.diff(&mut cursor, &wl) {
                replica = Some(apply_diff(replica.as_ref(), &diff).unwrap());
            }
            let expected = store.get(&[]).map(|v| wl.filter(&v));
            prop_assert_eq!(replica.as_ref(), expected.as_ref());
        }
    }

    /// An unfiltered client rebuilds the whole store from its diffs, and
    /// the store's serials stay consistent after every batch.
    #[test]
    fn prop_full_replica_round_trips(batches in op_batches()) {
        let mut store = Store::new(SerialClock::new());
        let mut cursor = Snapshot::unseen();
        let mut replica: Option<Value> = None;

        for batch in batches {
            for op in &batch {
                op.apply(&mut store);
            }
            prop_assert!(store.root().serials_consistent());
            if let Some(diff) = store.diff(&mut cursor, &Whitelist::All) {
                replica = Some(apply_diff(replica.as_ref(), &diff).unwrap());
            }
            let current = store.get(&[]);
            prop_assert_eq!(replica.as_ref(), current.as_ref());
        }
    }

    /// Diffing twice without a mutation in between yields nothing.
    #[test]
    fn prop_diff_is_idempotent(batches in op_batches()) {
        let mut store = Store::new(SerialClock::new());
        let mut cursor = Snapshot::unseen();
        for batch in batches {
            for op in &batch {
                op.apply(&mut store);
            }
            store.diff(&mut cursor, &Whitelist::All);
            prop_assert!(store.diff(&mut cursor, &Whitelist::All).is_none());
        }
    }

    /// Serials never move backwards, and every child serial covers its
    /// descendants.
    #[test]
    fn prop_serials_are_monotonic(batches in op_batches()) {
        let mut store = Store::new(SerialClock::new());
        let mut last = store.root().child_serial();
        for batch in batches {
            for op in &batch {
                op.apply(&mut store);
                let now = store.root().child_serial();
                prop_assert!(now >= last);
                last = now;
            }
            prop_assert!(store.root().serials_consistent());
        }
    }

    /// A listener fires exactly when its watched node appeared, vanished,
    /// or changed serials since the previous collection.
    #[test]
    fn prop_listener_fires_iff_watched_changed(watched in path(), batches in op_batches()) {
        let mut store = Store::new(SerialClock::new());
        let mut sync = Synchronizer::new();
        let token: SyncToken = sync
            .add(&mut store, &PathSpec::keys(watched.iter().cloned()), |_: &mut Store| Ok(()), false)
            .unwrap();
        let mut before = fingerprint(&store, &watched);

        for batch in batches {
            for op in &batch {
                op.apply(&mut store);
            }
            let fired = sync.collect(&store).contains(&token);
            let after = fingerprint(&store, &watched);
            prop_assert_eq!(fired, before != after);
            before = after;
        }
    }
}
