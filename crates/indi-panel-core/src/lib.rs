//! # INDI Panel Core
//!
//! Pure primitives shared by every layer of the INDI panel: the serial clock,
//! path selectors for synchronizers, field whitelists and the diff wire format.
//!
//! This crate contains no I/O and no storage. It is pure computation over
//! `serde_json` values.
//!
//! ## Key Types
//!
//! - [`SerialClock`] - Process-wide monotonically increasing version counter
//! - [`PathSpec`] - Tree-shaped selector with exact keys, wildcards and OR-groups
//! - [`Whitelist`] - Recursive field filter applied to snapshots and diffs
//! - [`Diff`] - The replication delta, serialized exactly as clients expect it
//!
//! ## Diff Wire Format
//!
//! ```text
//! scalar                          -> raw JSON value
//! {"newObject": {prop: Diff}}     -> object replaced wholesale
//! {"newArray": {"0": Diff}}       -> array replaced wholesale
//! {"update": {prop: Diff}, "delete": ["prop"]}
//! ```
//!
//! See [`apply_diff`] for the client-side inverse.

pub mod diff;
pub mod error;
pub mod path;
pub mod serial;
pub mod whitelist;

pub use diff::{apply_diff, Diff};
pub use error::{CoreError, Result};
pub use path::{PathElement, PathSpec, Step};
pub use serial::{Serial, SerialClock};
pub use whitelist::Whitelist;
