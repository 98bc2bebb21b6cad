//! # INDI Panel Testkit
//!
//! Testing utilities for the INDI panel.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a fake INDI server over in-memory streams and a panel
//!   wired to it
//! - **Generators**: Proptest strategies for store mutations and whitelists
//! - **Vectors**: Canned INDI XML and golden diff shapes
//!
//! ## Golden Vectors
//!
//! ```rust
//! use indi_panel_testkit::vectors::{all_diff_vectors, replay};
//!
//! for vector in all_diff_vectors() {
//!     assert_eq!(replay(&vector), vector.expected, "{}", vector.name);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use indi_panel_testkit::generators::op_batches;
//!
//! proptest! {
//!     #[test]
//!     fn diff_round_trips(batches in op_batches()) {
//!         // apply each batch, diff, apply_diff, compare
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use indi_panel_testkit::fixtures::PanelFixture;
//! use indi_panel_testkit::vectors::CCD_DEFINITIONS;
//!
//! async fn example() {
//!     let mut fixture = PanelFixture::new(1);
//!     let mut driver = fixture.next_driver().await;
//!     driver.send(CCD_DEFINITIONS).await;
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{DuplexConnector, FakeDriver, PanelFixture};
pub use generators::{op_batches, store_op, whitelist, StoreOp};
pub use vectors::{all_diff_vectors, replay, verify_all_vectors, DiffVector};
