//! # INDI Panel Sync
//!
//! Change propagation on top of the versioned store.
//!
//! ## Overview
//!
//! Business logic registers callbacks against path selectors. Mutations made
//! during one tick are batched; at commit time every callback whose watched
//! subtree changed runs once, then each replication client receives the diff
//! between its cursor and the store.
//!
//! ## Key Types
//!
//! - [`Synchronizer`] - Callbacks keyed by [`PathSpec`](indi_panel_core::PathSpec)
//! - [`StateHub`] - Owns the store and drives commits
//! - [`Replicator`] - Per-client cursors and diff channels
//! - [`ReplicaCopy`] - Client-side mirror rebuilt from diffs
//!
//! ## Usage
//!
//! ```rust
//! use indi_panel_core::{PathSpec, SerialClock, Whitelist};
//! use indi_panel_store::Store;
//! use indi_panel_sync::{ReplicaCopy, StateHub, SyncConfig};
//! use serde_json::json;
//!
//! let mut hub = StateHub::new(SerialClock::new(), SyncConfig::default());
//! let (_client, mut diffs) = hub.attach_client(Whitelist::All);
//!
//! hub.add_synchronizer(
//!     &PathSpec::keys(["deviceTree"]).wildcard(),
//!     |_store: &mut Store| Ok(()),
//!     false,
//! )
//! .unwrap();
//!
//! hub.mutate(|store| store.set(&["deviceTree", "CCD1"], &json!({})))
//!     .0
//!     .unwrap();
//!
//! let mut replica = ReplicaCopy::new();
//! while let Ok(diff) = diffs.try_recv() {
//!     replica.apply(&diff).unwrap();
//! }
//! assert_eq!(replica.value(), Some(&json!({"deviceTree": {"CCD1": {}}})));
//! ```

pub mod error;
pub mod hub;
pub mod replicator;
pub mod synchronizer;
mod trigger;

pub use error::{Result, SyncError};
pub use hub::{CommitReport, StateHub, SyncConfig};
pub use replicator::{ClientId, ReplicaCopy, Replicator};
pub use synchronizer::{Callback, SyncToken, Synchronizer};
