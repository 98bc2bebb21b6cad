//! # INDI Panel Store
//!
//! The versioned, observable in-memory state tree that backs the panel.
//!
//! ## Overview
//!
//! Every node carries a `serial` (its last local mutation) and composites
//! carry a `child_serial` (the highest serial beneath them). Serials come from
//! one injected [`SerialClock`](indi_panel_core::SerialClock), are shared by
//! all mutations of a tick, and are never reused.
//!
//! ## Key Types
//!
//! - [`Store`] - Path-addressed get/set/remove over the tree
//! - [`Node`] - A versioned tree node (scalar, object or array)
//! - [`Snapshot`] - A consumer's cursor over serials, advanced by [`Store::diff`]
//!
//! ## Usage
//!
//! ```rust
//! use indi_panel_core::{apply_diff, SerialClock, Whitelist};
//! use indi_panel_store::{Snapshot, Store};
//! use serde_json::json;
//!
//! let mut store = Store::new(SerialClock::new());
//! store.set(&["a", "b"], &json!(1)).unwrap();
//! store.end_tick();
//!
//! let mut cursor = Snapshot::unseen();
//! let full = store.diff(&mut cursor, &Whitelist::All).unwrap();
//! let client = apply_diff(None, &full).unwrap();
//!
//! store.set(&["a", "b"], &json!(2)).unwrap();
//! store.end_tick();
//! let delta = store.diff(&mut cursor, &Whitelist::All).unwrap();
//! assert_eq!(apply_diff(Some(&client), &delta).unwrap(), json!({"a": {"b": 2}}));
//! ```
//!
//! ## Design Notes
//!
//! - **Single writer**: `Store` is not `Sync`; callers serialize access.
//! - **Merge on set**: composite writes merge; absent keys are removed.
//! - **Sealed ticks**: taking a snapshot or a diff seals the open tick.

pub mod error;
pub mod node;
pub mod snapshot;
pub mod store;

pub use error::{display_path, Result, StoreError};
pub use node::{Node, NodeKind};
pub use snapshot::Snapshot;
pub use store::Store;
